//! Process side of the runtime: the ephemeral root, namespace setup and the
//! launcher tying them to an assembled image.

mod launcher;
pub mod namespace;
mod root;

pub use launcher::{ensure_binary, resolve_command, SandboxLauncher};
pub use namespace::{clone_flags, run_confined};
pub use root::EphemeralRoot;
