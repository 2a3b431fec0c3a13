//! Key file management
//!
//! A private key file holds one line of hex (the 32-byte Ed25519 secret).
//! Keys live in `~/.keyledger/keys` as `<name>.priv`, with the public key
//! next to it as `<name>.pub`.

use keyledger_core::{KeyledgerError, KeyledgerResult};
use keyledger_crypto::keys::KeyPair;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default key directory, `~/.keyledger/keys`
pub fn default_key_dir() -> KeyledgerResult<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".keyledger").join("keys"))
        .ok_or_else(|| KeyledgerError::Config("cannot determine home directory".into()))
}

/// Load a private key file
pub fn load_key_file(path: &Path) -> KeyledgerResult<KeyPair> {
    let content = fs::read_to_string(path).map_err(|e| {
        KeyledgerError::Config(format!("failed to read key file {}: {}", path.display(), e))
    })?;
    let keypair = KeyPair::from_hex(&content)?;
    debug!("Loaded key {} from {}", keypair.public_key().to_hex(), path.display());
    Ok(keypair)
}

/// Paths of a generated key pair
#[derive(Debug, Clone)]
pub struct KeyFileInfo {
    pub name: String,
    pub public_key: String,
    pub private_path: PathBuf,
    pub public_path: PathBuf,
}

/// Named keys in one directory
pub struct KeyManager {
    keys_dir: PathBuf,
}

impl KeyManager {
    pub fn new(keys_dir: PathBuf) -> Self {
        Self { keys_dir }
    }

    pub fn private_path(&self, name: &str) -> PathBuf {
        self.keys_dir.join(format!("{}.priv", name))
    }

    pub fn public_path(&self, name: &str) -> PathBuf {
        self.keys_dir.join(format!("{}.pub", name))
    }

    /// Load the private key stored under `name`
    pub fn load(&self, name: &str) -> KeyledgerResult<KeyPair> {
        load_key_file(&self.private_path(name))
    }

    /// Generate and store a key pair; existing files are kept unless `force`
    pub fn generate(&self, name: &str, force: bool) -> KeyledgerResult<KeyFileInfo> {
        let private_path = self.private_path(name);
        let public_path = self.public_path(name);

        if !force {
            for path in [&private_path, &public_path] {
                if path.exists() {
                    return Err(KeyledgerError::Config(format!(
                        "file exists: {} (use --force to overwrite)",
                        path.display()
                    )));
                }
            }
        }

        fs::create_dir_all(&self.keys_dir)?;

        let keypair = KeyPair::generate();
        let public_key = keypair.public_key().to_hex();

        write_private_key(&private_path, &keypair)?;
        fs::write(&public_path, format!("{}\n", public_key))?;

        info!("Wrote key pair {} to {}", name, self.keys_dir.display());

        Ok(KeyFileInfo {
            name: name.to_string(),
            public_key,
            private_path,
            public_path,
        })
    }
}

#[cfg(unix)]
fn write_private_key(path: &Path, keypair: &KeyPair) -> KeyledgerResult<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    writeln!(file, "{}", keypair.secret_hex())?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private_key(path: &Path, keypair: &KeyPair) -> KeyledgerResult<()> {
    fs::write(path, format!("{}\n", keypair.secret_hex()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::new(dir.path().join("keys"));

        let info = manager.generate("alice", false).unwrap();
        assert!(info.private_path.ends_with("alice.priv"));

        let loaded = manager.load("alice").unwrap();
        assert_eq!(loaded.public_key().to_hex(), info.public_key);

        let public = fs::read_to_string(&info.public_path).unwrap();
        assert_eq!(public.trim(), info.public_key);
    }

    #[test]
    fn test_generate_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::new(dir.path().to_path_buf());

        let first = manager.generate("alice", false).unwrap();
        assert!(matches!(
            manager.generate("alice", false),
            Err(KeyledgerError::Config(_))
        ));

        let second = manager.generate("alice", true).unwrap();
        assert_ne!(first.public_key, second.public_key);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::new(dir.path().to_path_buf());
        assert!(matches!(manager.load("nobody"), Err(KeyledgerError::Config(_))));

        fs::write(manager.private_path("bad"), "not hex\n").unwrap();
        assert!(matches!(
            manager.load("bad"),
            Err(KeyledgerError::InvalidPrivateKey)
        ));
    }

    #[test]
    fn test_load_external_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signer.priv");
        let keypair = KeyPair::generate();
        fs::write(&path, format!("  {}\n", keypair.secret_hex())).unwrap();

        let loaded = load_key_file(&path).unwrap();
        assert_eq!(loaded.public_key(), keypair.public_key());
    }
}
