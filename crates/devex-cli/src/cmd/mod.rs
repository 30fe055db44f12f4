//! One module per top-level subcommand, matching the teacher's `cmd::`
//! layout (one file per verb, a plain function the dispatcher calls).

pub mod install;
pub mod system;
pub mod undo;
pub mod uninstall;

/// Exit code conventions shared by every command (§6).
pub mod exit {
    /// Everything requested succeeded.
    pub const SUCCESS: i32 = 0;
    /// An unexpected or unrecoverable error.
    pub const FATAL: i32 = 1;
    /// Caller-supplied input or state failed validation.
    pub const VALIDATION: i32 = 2;
    /// The run was interrupted (e.g. Ctrl-C).
    pub const INTERRUPTED: i32 = 130;
}
