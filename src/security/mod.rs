#[derive(Debug, thiserror::Error)]
#[error("key guard error: {0}")]
pub struct KeyGuardError(pub String);

/// The shareKeys handshake payload: session comm key material encrypted under the
/// requester's public key, plus that node's own stored secret if the master holds one.
#[derive(Clone, Debug)]
pub struct KeyBundle {
    pub comm_key: String,
    pub comm_iv: String,
    pub node_key: Option<String>,
}

/// KeyGuard is the seam to the external cryptography collaborator. `encrypt`/`decrypt`
/// protect key/value entries at rest; the `comm` pair protects values exchanged with
/// peers over the replication channel. The sequencer never touches key material itself.
pub trait KeyGuard: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, KeyGuardError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, KeyGuardError>;
    fn encrypt_comm(&self, plaintext: &str) -> Result<String, KeyGuardError>;
    fn decrypt_comm(&self, ciphertext: &str) -> Result<String, KeyGuardError>;

    /// This node's public key, offered to the master during the shareKeys handshake.
    fn public_key(&self) -> String;

    /// Master side of shareKeys: wrap the comm keys (and the caller's stored node key,
    /// if any) under the caller's public key.
    fn bundle_for(&self, public_key: &str, node_key: Option<&str>) -> Result<KeyBundle, KeyGuardError>;

    /// Follower side of shareKeys: unwrap and adopt the master's comm keys.
    fn install_comm_keys(&self, bundle: &KeyBundle) -> Result<(), KeyGuardError>;
}

/// Pass-through guard for tests and single-node runs.
pub struct PlaintextKeyGuard;

impl KeyGuard for PlaintextKeyGuard {
    fn encrypt(&self, plaintext: &str) -> Result<String, KeyGuardError> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, KeyGuardError> {
        Ok(ciphertext.to_string())
    }

    fn encrypt_comm(&self, plaintext: &str) -> Result<String, KeyGuardError> {
        Ok(plaintext.to_string())
    }

    fn decrypt_comm(&self, ciphertext: &str) -> Result<String, KeyGuardError> {
        Ok(ciphertext.to_string())
    }

    fn public_key(&self) -> String {
        String::new()
    }

    fn bundle_for(&self, _public_key: &str, node_key: Option<&str>) -> Result<KeyBundle, KeyGuardError> {
        Ok(KeyBundle {
            comm_key: String::new(),
            comm_iv: String::new(),
            node_key: node_key.map(|k| k.to_string()),
        })
    }

    fn install_comm_keys(&self, _bundle: &KeyBundle) -> Result<(), KeyGuardError> {
        Ok(())
    }
}
