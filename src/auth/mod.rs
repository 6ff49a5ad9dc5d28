/*!
 * Request authentication: credentials and signature construction
 */

pub mod credentials;
pub mod signer;

pub use credentials::{Credentials, CredentialsProvider, StaticCredentialsProvider};
pub use signer::{SignableRequest, Signer};
