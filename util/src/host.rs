//! Host platform (linux for example) utility functions

use std::env;
use std::path::PathBuf;
use uname;

/// Name of the environment variable pointing at the root of the software tree.
///
/// Parameter files are found under `$HOLDBOT_SW_ROOT/params` and sessions are
/// created under `$HOLDBOT_SW_ROOT/sessions`.
pub const SW_ROOT_ENV_VAR: &str = "HOLDBOT_SW_ROOT";

/// Retrieve uname information.
pub fn get_uname() -> std::io::Result<uname::Info> {
    uname::uname()
}

/// Get the root directory of the software tree from the environment.
pub fn get_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}
