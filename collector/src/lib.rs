pub mod connector;
pub mod normalize;
pub mod tunnel;
pub mod vault;

pub use connector::{
    build_connector, ConnectorConfig, ConnectorError, ConnectorFactory, DbConnector,
    NativeConnectorFactory,
};
pub use tunnel::{TunnelConfig, TunnelForwarder};
pub use vault::{CredentialVault, EncryptedCredential, VaultError};
