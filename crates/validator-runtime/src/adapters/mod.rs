//! # Adapter Implementations
//!
//! Boundaries between the listener and the outside world: the filesystem
//! (`resolver`), the external validator (`validator`) and the startup
//! runtime check (`probe`). The bus itself lives in `shared-bus`.

pub mod probe;
pub mod resolver;
pub mod validator;

pub use probe::*;
pub use resolver::*;
pub use validator::*;
