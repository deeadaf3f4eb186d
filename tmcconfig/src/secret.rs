//! Chiffrement des secrets stockés dans la configuration
//!
//! La clé AES-256 est dérivée (SHA-256) de l'identifiant de la machine : un
//! `config.yaml` copié sur une autre machine ne permet pas de relire le mot
//! de passe du catalogue.
//!
//! Format stocké : `encrypted:` suivi de `base64(nonce(12) + ciphertext)`.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use anyhow::{Result, anyhow};
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fs;

const ENCRYPTED_PREFIX: &str = "encrypted:";

const MACHINE_ID_FILES: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Identifiant stable de la machine.
///
/// Linux expose `machine-id` ; ailleurs, ou si le fichier manque, on se
/// rabat sur le nom d'hôte et le répertoire personnel.
fn machine_id() -> Result<String> {
    for file in MACHINE_ID_FILES {
        if let Ok(id) = fs::read_to_string(file) {
            let id = id.trim();
            if !id.is_empty() {
                return Ok(id.to_string());
            }
        }
    }

    let host = std::env::var("HOSTNAME").unwrap_or_default();
    let home = dirs::home_dir()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();
    if host.is_empty() && home.is_empty() {
        return Err(anyhow!("Failed to determine a machine identifier"));
    }
    Ok(format!("{host}:{home}"))
}

fn derive_key(machine: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(machine.as_bytes());
    hasher.update(b"tmcmusic-config-secret-v1");
    let digest = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

fn seal(key: &[u8; 32], plain: &str) -> Result<String> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    // Nonce dérivé du clair : même secret = même texte chiffré, le fichier
    // de config ne change pas à chaque sauvegarde.
    let mut hasher = Sha256::new();
    hasher.update(plain.as_bytes());
    hasher.update(b"tmcmusic-nonce-v1");
    let digest = hasher.finalize();
    let nonce_bytes = &digest[..12];

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce_bytes), plain.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut combined = Vec::with_capacity(12 + ciphertext.len());
    combined.extend_from_slice(nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(format!(
        "{}{}",
        ENCRYPTED_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(&combined)
    ))
}

fn open(key: &[u8; 32], sealed: &str) -> Result<String> {
    let encoded = sealed
        .strip_prefix(ENCRYPTED_PREFIX)
        .ok_or_else(|| anyhow!("Invalid encrypted secret (missing prefix)"))?;

    let combined = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| anyhow!("Invalid base64: {}", e))?;
    if combined.len() < 12 {
        return Err(anyhow!("Invalid ciphertext (too short)"));
    }

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
    let (nonce, ciphertext) = combined.split_at(12);
    let plain = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("Decryption failed (wrong machine or corrupted data): {}", e))?;

    String::from_utf8(plain).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
}

/// Chiffre `plain` avec la clé de la machine.
pub fn encrypt_secret(plain: &str) -> Result<String> {
    seal(&derive_key(&machine_id()?), plain)
}

/// Déchiffre une valeur produite par [`encrypt_secret`] sur cette machine.
pub fn decrypt_secret(sealed: &str) -> Result<String> {
    open(&derive_key(&machine_id()?), sealed)
}

pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

/// Renvoie le secret en clair, qu'il soit stocké chiffré ou non.
pub fn reveal_secret(value: &str) -> Result<String> {
    if is_encrypted(value) {
        decrypt_secret(value)
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_with_same_key() {
        let key = derive_key("machine-a");
        let sealed = seal(&key, "hunter2").unwrap();

        assert!(is_encrypted(&sealed));
        assert!(!sealed.contains("hunter2"));
        assert_eq!(open(&key, &sealed).unwrap(), "hunter2");
    }

    #[test]
    fn test_sealing_is_deterministic() {
        let key = derive_key("machine-a");
        assert_eq!(seal(&key, "same").unwrap(), seal(&key, "same").unwrap());
    }

    #[test]
    fn test_other_machine_cannot_open() {
        let sealed = seal(&derive_key("machine-a"), "secret").unwrap();
        assert!(open(&derive_key("machine-b"), &sealed).is_err());
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let key = derive_key("machine-a");
        assert!(open(&key, "plaintext").is_err());
        assert!(open(&key, "encrypted:not base64!").is_err());
        assert!(open(&key, "encrypted:AAAA").is_err());
    }

    #[test]
    fn test_reveal_plaintext_passthrough() {
        assert_eq!(reveal_secret("plain").unwrap(), "plain");
        assert_eq!(reveal_secret("").unwrap(), "");
    }
}
