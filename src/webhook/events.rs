use serde::Deserialize;

/// Top-level webhook event parsed from the payload based on X-GitHub-Event header.
#[derive(Debug)]
pub enum WebhookEvent {
    Push(PushEvent),
    Installation(InstallationEvent),
    InstallationRepositories(InstallationRepositoriesEvent),
    Ping,
    Unsupported(String),
}

#[derive(Debug, Deserialize)]
pub struct PushEvent {
    /// Full ref that was pushed, e.g. `refs/heads/master`.
    #[serde(rename = "ref")]
    pub ref_name: String,
    /// Absent for branch deletions.
    pub head_commit: Option<HeadCommitPayload>,
    pub repository: RepositoryPayload,
    pub installation: Option<InstallationPayload>,
}

#[derive(Debug, Deserialize)]
pub struct InstallationEvent {
    pub action: String,
    pub installation: InstallationPayload,
}

#[derive(Debug, Deserialize)]
pub struct InstallationRepositoriesEvent {
    pub action: String,
    pub installation: InstallationPayload,
    #[serde(default)]
    pub repositories_added: Vec<RepoRefPayload>,
    #[serde(default)]
    pub repositories_removed: Vec<RepoRefPayload>,
}

#[derive(Debug, Deserialize)]
pub struct HeadCommitPayload {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryPayload {
    pub name: String,
    pub full_name: String,
    pub owner: OwnerPayload,
}

/// Push payloads carry `name` for the repository owner; most other events
/// only carry `login`.
#[derive(Debug, Deserialize)]
pub struct OwnerPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
}

impl OwnerPayload {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().or(self.login.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct InstallationPayload {
    pub id: u64,
    #[serde(default)]
    pub account: Option<AccountPayload>,
}

#[derive(Debug, Deserialize)]
pub struct AccountPayload {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct RepoRefPayload {
    pub full_name: String,
}

impl RepoRefPayload {
    /// Split `owner/name`; repositories always come fully qualified.
    pub fn split(&self) -> Option<(&str, &str)> {
        self.full_name.split_once('/')
    }
}

impl WebhookEvent {
    pub fn parse(event_type: &str, payload: &[u8]) -> Result<Self, serde_json::Error> {
        match event_type {
            "push" => {
                let event: PushEvent = serde_json::from_slice(payload)?;
                Ok(WebhookEvent::Push(event))
            }
            // GitHub renamed the integration_* events to installation_*;
            // older deliveries still use the legacy names.
            "installation" | "integration_installation" => {
                let event: InstallationEvent = serde_json::from_slice(payload)?;
                Ok(WebhookEvent::Installation(event))
            }
            "installation_repositories" | "integration_installation_repositories" => {
                let event: InstallationRepositoriesEvent = serde_json::from_slice(payload)?;
                Ok(WebhookEvent::InstallationRepositories(event))
            }
            "ping" => Ok(WebhookEvent::Ping),
            other => Ok(WebhookEvent::Unsupported(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_push_event() {
        let payload = serde_json::json!({
            "ref": "refs/heads/master",
            "head_commit": { "id": "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3" },
            "repository": {
                "name": "cicd",
                "full_name": "k8s-community/cicd",
                "owner": { "name": "k8s-community" }
            },
            "installation": { "id": 1234 }
        });

        let event = WebhookEvent::parse("push", payload.to_string().as_bytes()).unwrap();
        let WebhookEvent::Push(push) = event else {
            panic!("expected a push event");
        };
        assert_eq!(push.ref_name, "refs/heads/master");
        assert_eq!(
            push.head_commit.unwrap().id,
            "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3"
        );
        assert_eq!(push.repository.name, "cicd");
        assert_eq!(push.repository.owner.name(), Some("k8s-community"));
        assert_eq!(push.installation.unwrap().id, 1234);
    }

    #[test]
    fn test_parse_push_without_head_commit() {
        // Branch deletion pushes have no head commit.
        let payload = serde_json::json!({
            "ref": "refs/heads/gone",
            "head_commit": null,
            "repository": {
                "name": "cicd",
                "full_name": "k8s-community/cicd",
                "owner": { "login": "k8s-community" }
            }
        });

        let event = WebhookEvent::parse("push", payload.to_string().as_bytes()).unwrap();
        let WebhookEvent::Push(push) = event else {
            panic!("expected a push event");
        };
        assert!(push.head_commit.is_none());
        assert_eq!(push.repository.owner.name(), Some("k8s-community"));
    }

    #[test]
    fn test_parse_installation_event_legacy_name() {
        let payload = serde_json::json!({
            "action": "created",
            "installation": { "id": 77, "account": { "login": "octocat" } }
        });

        let event =
            WebhookEvent::parse("integration_installation", payload.to_string().as_bytes())
                .unwrap();
        let WebhookEvent::Installation(installation) = event else {
            panic!("expected an installation event");
        };
        assert_eq!(installation.installation.id, 77);
        assert_eq!(
            installation.installation.account.unwrap().login,
            "octocat"
        );
    }

    #[test]
    fn test_parse_installation_repositories_event() {
        let payload = serde_json::json!({
            "action": "added",
            "installation": { "id": 77, "account": { "login": "octocat" } },
            "repositories_added": [ { "full_name": "octocat/hello" } ],
            "repositories_removed": []
        });

        let event =
            WebhookEvent::parse("installation_repositories", payload.to_string().as_bytes())
                .unwrap();
        let WebhookEvent::InstallationRepositories(event) = event else {
            panic!("expected an installation_repositories event");
        };
        assert_eq!(event.repositories_added.len(), 1);
        assert_eq!(
            event.repositories_added[0].split(),
            Some(("octocat", "hello"))
        );
    }

    #[test]
    fn test_unknown_event_is_unsupported() {
        let event = WebhookEvent::parse("watch", b"{}").unwrap();
        assert!(matches!(event, WebhookEvent::Unsupported(name) if name == "watch"));
    }
}
