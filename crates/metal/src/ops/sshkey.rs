//! SSH key registration and removal.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use super::{exclusive, Presence};
use crate::error::{api, OpError, OpResult};
use crate::providers::resources::SshKey;
use crate::providers::{CreateSshKeyRequest, Provider};
use crate::serialize::SshKeySummary;
use crate::validate::is_valid_uuid;

/// Parameters of an SSH key operation.
#[derive(Debug, Clone, Default)]
pub struct SshKeyParams {
    pub state: Presence,
    pub label: Option<String>,
    pub id: Option<String>,
    pub fingerprint: Option<String>,
    /// Public key string: `<type> <base64> [comment]`.
    pub key: Option<String>,
    /// File holding the public key.
    pub key_file: Option<PathBuf>,
}

/// A public key split into its key string and optional label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedKey {
    pub key: String,
    /// Third token of the key string, if present.
    pub label: Option<String>,
}

/// Parse a public key string.
///
/// # Errors
/// Fails unless the trimmed string has two or three whitespace separated
/// tokens.
pub fn load_key_string(raw: &str) -> OpResult<LoadedKey> {
    let key = raw.trim();
    let tokens: Vec<&str> = key.split_whitespace().collect();
    match tokens.as_slice() {
        [_, _] => Ok(LoadedKey {
            key: key.to_string(),
            label: None,
        }),
        [_, _, label] => Ok(LoadedKey {
            key: key.to_string(),
            label: Some((*label).to_string()),
        }),
        _ => Err(OpError::invalid(format!("Public key {key} is in wrong format"))),
    }
}

async fn read_key_file(path: &Path) -> OpResult<LoadedKey> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| OpError::KeyFile {
            path: path.to_path_buf(),
            source,
        })?;
    load_key_string(&contents)
}

/// Fields an existing key is matched on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Selector {
    label: Option<String>,
    id: Option<String>,
    fingerprint: Option<String>,
    key: Option<String>,
}

impl Selector {
    /// A key string, when given, is the only criterion. Otherwise every
    /// supplied field must match.
    fn matches(&self, k: &SshKey) -> bool {
        if let Some(key) = &self.key {
            return &k.key == key;
        }
        self.label.as_ref().is_none_or(|l| &k.label == l)
            && self.id.as_ref().is_none_or(|i| &k.id == i)
            && self.fingerprint.as_ref().is_none_or(|f| &k.fingerprint == f)
    }
}

/// Outcome of an SSH key operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshKeyResult {
    pub changed: bool,
    pub sshkeys: Vec<SshKeySummary>,
}

impl SshKeyParams {
    fn validate(&self) -> OpResult<()> {
        exclusive(&[
            ("label", self.label.is_some(), "id", self.id.is_some()),
            ("label", self.label.is_some(), "fingerprint", self.fingerprint.is_some()),
            ("id", self.id.is_some(), "fingerprint", self.fingerprint.is_some()),
            ("key", self.key.is_some(), "fingerprint", self.fingerprint.is_some()),
            ("key", self.key.is_some(), "id", self.id.is_some()),
            ("key_file", self.key_file.is_some(), "key", self.key.is_some()),
        ])?;

        if let Some(id) = &self.id {
            if !is_valid_uuid(id) {
                return Err(OpError::invalid(format!("sshkey ID {id} is not valid UUID")));
            }
        }
        Ok(())
    }

    fn selector(&self, loaded: Option<&LoadedKey>) -> Selector {
        let mut selector = Selector {
            label: self.label.clone(),
            id: self.id.clone(),
            fingerprint: self.fingerprint.clone(),
            key: self.key.as_deref().map(|k| k.trim().to_string()),
        };
        if let Some(loaded) = loaded {
            selector.key = Some(loaded.key.clone());
            if selector.label.is_none() {
                selector.label.clone_from(&loaded.label);
            }
        }
        selector
    }

    /// Key and label to register when nothing matches.
    fn new_key(&self, loaded: Option<LoadedKey>) -> OpResult<CreateSshKeyRequest> {
        let from_param = self.key.as_deref().map(load_key_string).transpose()?;
        let source = from_param.or(loaded);

        let label = self
            .label
            .clone()
            .or_else(|| source.as_ref().and_then(|k| k.label.clone()));

        let missing = |param: &str| {
            OpError::invalid(format!(
                "If you want to ensure a key is present, you must supply both a label and a key string, either in module params, or in a key file. {param} is missing"
            ))
        };

        let label = label.ok_or_else(|| missing("label"))?;
        let key = source.map(|k| k.key).ok_or_else(|| missing("key"))?;
        Ok(CreateSshKeyRequest { label, key })
    }
}

/// Ensure the selected SSH key is registered or removed.
///
/// # Errors
/// Fails on invalid parameters, an unreadable key file, or any API error.
pub async fn act_on_sshkeys(provider: &dyn Provider, params: &SshKeyParams) -> OpResult<SshKeyResult> {
    params.validate()?;

    let loaded = match &params.key_file {
        Some(path) => Some(read_key_file(path).await?),
        None => None,
    };
    let selector = params.selector(loaded.as_ref());

    let existing = provider
        .list_ssh_keys()
        .await
        .map_err(api("failed to list SSH keys"))?;
    let mut matching: Vec<SshKey> = existing.into_iter().filter(|k| selector.matches(k)).collect();
    let mut changed = false;

    match params.state {
        Presence::Present => {
            if matching.is_empty() {
                let req = params.new_key(loaded)?;
                let label = req.label.clone();
                let created = provider
                    .create_ssh_key(req)
                    .await
                    .map_err(api(format!("failed to create SSH key {label}")))?;
                info!(id = %created.id, label = %created.label, "Registered SSH key");
                matching.push(created);
                changed = true;
            }
        }
        Presence::Absent => {
            for key in &matching {
                provider.delete_ssh_key(&key.id).await.map_err(api(format!(
                    "while trying to remove sshkey {}, id {} {}, got error",
                    key.label, key.id, params.state
                )))?;
                info!(id = %key.id, label = %key.label, "Removed SSH key");
                changed = true;
            }
        }
    }

    Ok(SshKeyResult {
        changed,
        sshkeys: matching.iter().map(SshKeySummary::from).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use std::io::Write;

    const KEY_ID: &str = "41d61bd8-3342-428b-a09c-e67bdd18a9b7";
    const PUBKEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHn0cTu3fw tomk@hp2";

    fn existing() -> SshKey {
        SshKey {
            id: KEY_ID.into(),
            label: "tomk@hp2".into(),
            fingerprint: "5c:93:74:7c:ed:07:17:62".into(),
            key: PUBKEY.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_load_key_string() {
        let loaded = load_key_string(&format!("  {PUBKEY}\n")).unwrap();
        assert_eq!(loaded.key, PUBKEY);
        assert_eq!(loaded.label.as_deref(), Some("tomk@hp2"));

        let bare = load_key_string("ssh-rsa AAAAB3").unwrap();
        assert_eq!(bare.label, None);

        let err = load_key_string("ssh-rsa").unwrap_err();
        assert_eq!(err.to_string(), "Public key ssh-rsa is in wrong format");
        assert!(load_key_string("a b c d").is_err());
    }

    #[test]
    fn test_selector_prefers_key() {
        let selector = Selector {
            label: Some("other".into()),
            key: Some(PUBKEY.into()),
            ..Default::default()
        };
        assert!(selector.matches(&existing()));

        let by_fields = Selector {
            label: Some("tomk@hp2".into()),
            fingerprint: Some("nope".into()),
            ..Default::default()
        };
        assert!(!by_fields.matches(&existing()));
    }

    #[test]
    fn test_validate_rejects_conflicts() {
        let params = SshKeyParams {
            key: Some(PUBKEY.into()),
            id: Some(KEY_ID.into()),
            ..Default::default()
        };
        assert_eq!(
            params.validate().unwrap_err().to_string(),
            "parameters are mutually exclusive: key|id"
        );

        let params = SshKeyParams {
            id: Some("1234".into()),
            ..Default::default()
        };
        assert_eq!(
            params.validate().unwrap_err().to_string(),
            "sshkey ID 1234 is not valid UUID"
        );
    }

    #[tokio::test]
    async fn test_present_existing_key_is_unchanged() {
        let mut mock = MockProvider::new();
        mock.expect_list_ssh_keys().returning(|| Ok(vec![existing()]));
        mock.expect_create_ssh_key().never();

        let params = SshKeyParams {
            key: Some(PUBKEY.into()),
            ..Default::default()
        };
        let result = act_on_sshkeys(&mock, &params).await.unwrap();
        assert!(!result.changed);
        assert_eq!(result.sshkeys[0].id, KEY_ID);
    }

    #[tokio::test]
    async fn test_present_creates_from_key_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{PUBKEY}").unwrap();

        let mut mock = MockProvider::new();
        mock.expect_list_ssh_keys().returning(|| Ok(vec![]));
        mock.expect_create_ssh_key()
            .times(1)
            .withf(|req| req.label == "from-file" && req.key == PUBKEY)
            .returning(|req| {
                Ok(SshKey {
                    id: KEY_ID.into(),
                    label: req.label,
                    key: req.key,
                    ..Default::default()
                })
            });

        let params = SshKeyParams {
            label: Some("from-file".into()),
            key_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let result = act_on_sshkeys(&mock, &params).await.unwrap();
        assert!(result.changed);
        assert_eq!(result.sshkeys[0].label, "from-file");
    }

    #[tokio::test]
    async fn test_present_without_key_fails() {
        let mut mock = MockProvider::new();
        mock.expect_list_ssh_keys().returning(|| Ok(vec![]));
        mock.expect_create_ssh_key().never();

        let params = SshKeyParams {
            label: Some("lonely".into()),
            ..Default::default()
        };
        let err = act_on_sshkeys(&mock, &params).await.unwrap_err();
        assert!(err.to_string().ends_with("key is missing"));
    }

    #[tokio::test]
    async fn test_absent_deletes_matches() {
        let mut mock = MockProvider::new();
        mock.expect_list_ssh_keys().returning(|| {
            Ok(vec![
                existing(),
                SshKey {
                    id: "other".into(),
                    label: "other".into(),
                    ..Default::default()
                },
            ])
        });
        mock.expect_delete_ssh_key()
            .times(1)
            .withf(|id| id == KEY_ID)
            .returning(|_| Ok(()));

        let params = SshKeyParams {
            state: Presence::Absent,
            id: Some(KEY_ID.into()),
            ..Default::default()
        };
        let result = act_on_sshkeys(&mock, &params).await.unwrap();
        assert!(result.changed);
        assert_eq!(result.sshkeys.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_file() {
        let mock = MockProvider::new();
        let params = SshKeyParams {
            key_file: Some(PathBuf::from("/nonexistent/id_ed25519.pub")),
            ..Default::default()
        };
        let err = act_on_sshkeys(&mock, &params).await.unwrap_err();
        assert!(matches!(err, OpError::KeyFile { .. }));
    }
}
