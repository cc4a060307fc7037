//! CLI command implementations.
//!
//! | Module  | Commands handled                  |
//! |---------|-----------------------------------|
//! | `run`   | `Run`                             |
//! | `state` | `Status`, `Reset`, `Endpoints`    |

pub mod run;
pub mod state;

pub use run::{RunRequest, cmd_run};
pub use state::{cmd_endpoints, cmd_reset, cmd_status};
