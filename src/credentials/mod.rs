//! API credential handling: the key itself, where keys come from, how long a
//! key sits out after a failure, and the rotating pool that hands keys out.

pub mod credential;
pub mod policy;
pub mod pool;
pub mod source;

pub use credential::{Credential, mask_secret};
pub use policy::{CooldownPolicy, CredentialFailure};
pub use pool::{CredentialPool, CredentialState, CredentialStatus, PoolError};
pub use source::{CredentialSource, EnvSource, StaticSource, parse_key_list};
