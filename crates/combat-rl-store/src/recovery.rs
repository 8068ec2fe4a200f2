//! Profile recovery chain
//!
//! Primary copy, then backup, then the class template, then a fresh profile
//! from the caller. The first candidate that loads and validates wins; the
//! caller never receives a partially valid profile.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use combat_rl_core::{AgentClass, BehaviorProfile, NetworkArchitecture, Result};

use crate::store::ProfileStore;

/// Where a recovered profile came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    /// The primary copy
    Primary,
    /// The previous revision
    Backup,
    /// The class-default template
    ClassDefault,
    /// Built by the caller
    Fresh,
}

/// Outcome of [`load_with_recovery`]
#[derive(Debug, Clone)]
pub struct RecoveredProfile {
    /// Usable profile
    pub profile: BehaviorProfile,
    /// Which step of the chain produced it
    pub source: ProfileSource,
    /// One line per candidate that existed but could not be used
    pub failures: Vec<String>,
}

impl RecoveredProfile {
    /// Whether a stored copy was damaged on the way
    #[must_use]
    pub fn had_corruption(&self) -> bool {
        !self.failures.is_empty()
    }
}

fn accept(
    candidate: Result<Option<BehaviorProfile>>,
    source: ProfileSource,
    class: AgentClass,
    owner_id: Option<&str>,
    expected: Option<&NetworkArchitecture>,
    failures: &mut Vec<String>,
) -> Option<BehaviorProfile> {
    let profile = match candidate {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            debug!(?source, class = %class, "no stored profile");
            return None;
        }
        Err(e) => {
            warn!(?source, class = %class, error = %e, "stored profile unreadable");
            failures.push(format!("{source:?}: {e}"));
            return None;
        }
    };
    if let Some(owner) = owner_id.filter(|owner| *owner != profile.owner_id) {
        warn!(?source, class = %class, owner, stored_owner = %profile.owner_id, "stored profile belongs to another owner");
        failures.push(format!("{source:?}: owner {} does not match {owner}", profile.owner_id));
        return None;
    }
    match profile.validate(Some(class), expected) {
        Ok(()) => Some(profile),
        Err(e) => {
            warn!(?source, class = %class, error = %e, "stored profile failed validation");
            failures.push(format!("{source:?}: {e}"));
            None
        }
    }
}

/// Load the profile of `owner_id`, walking the recovery chain.
///
/// `expected` is the architecture of the agent that will receive the
/// profile; candidates of another shape are rejected. `fresh` builds the
/// last-resort profile and is only called when every stored candidate fails.
pub async fn load_with_recovery<S, F>(
    store: &S,
    class: AgentClass,
    owner_id: &str,
    expected: Option<&NetworkArchitecture>,
    fresh: F,
) -> RecoveredProfile
where
    S: ProfileStore + ?Sized,
    F: FnOnce() -> BehaviorProfile,
{
    let mut failures = Vec::new();

    let primary = store.load(class, owner_id).await;
    if let Some(profile) = accept(primary, ProfileSource::Primary, class, Some(owner_id), expected, &mut failures) {
        return RecoveredProfile {
            profile,
            source: ProfileSource::Primary,
            failures,
        };
    }

    let backup = store.load_backup(class, owner_id).await;
    if let Some(profile) = accept(backup, ProfileSource::Backup, class, Some(owner_id), expected, &mut failures) {
        info!(owner = owner_id, class = %class, "recovered profile from backup");
        return RecoveredProfile {
            profile,
            source: ProfileSource::Backup,
            failures,
        };
    }

    let template = store.load_class_default(class).await;
    if let Some(mut profile) = accept(template, ProfileSource::ClassDefault, class, None, expected, &mut failures) {
        info!(owner = owner_id, class = %class, "using class default profile");
        let now = Utc::now();
        profile.profile_id = Uuid::new_v4();
        profile.owner_id = owner_id.to_string();
        profile.created_at = now;
        profile.updated_at = now;
        profile.revision = 0;
        return RecoveredProfile {
            profile,
            source: ProfileSource::ClassDefault,
            failures,
        };
    }

    if !failures.is_empty() {
        warn!(owner = owner_id, class = %class, failures = failures.len(), "all stored profiles unusable, starting fresh");
    }
    RecoveredProfile {
        profile: fresh(),
        source: ProfileSource::Fresh,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ProfileCompression;
    use crate::store::MemoryProfileStore;
    use combat_rl_core::LearningMetrics;

    fn arch() -> NetworkArchitecture {
        NetworkArchitecture::dense(2, vec![2], 2)
    }

    fn profile(owner: &str, fill: f32) -> BehaviorProfile {
        let a = arch();
        BehaviorProfile::new(
            AgentClass::Support,
            owner,
            a.clone(),
            vec![fill; a.weight_count()],
            vec![fill; a.bias_count()],
            LearningMetrics::default(),
        )
    }

    #[tokio::test]
    async fn test_primary_wins() {
        let store = MemoryProfileStore::new();
        store.save(&profile("medic", 1.0)).await.unwrap();
        let got = load_with_recovery(&store, AgentClass::Support, "medic", Some(&arch()), || {
            profile("medic", 9.0)
        })
        .await;
        assert_eq!(got.source, ProfileSource::Primary);
        assert!(!got.had_corruption());
        assert_eq!(got.profile.weights[0], 1.0);
    }

    #[tokio::test]
    async fn test_corrupt_primary_falls_back_to_backup() {
        let store = MemoryProfileStore::new();
        store.save(&profile("medic", 1.0)).await.unwrap();
        store.put_raw(AgentClass::Support, "medic", "{\"format\":\"x\"}").await;

        let got = load_with_recovery(&store, AgentClass::Support, "medic", Some(&arch()), || {
            profile("medic", 9.0)
        })
        .await;
        assert_eq!(got.source, ProfileSource::Backup);
        assert_eq!(got.failures.len(), 1);
        assert_eq!(got.profile.weights[0], 1.0);
    }

    #[tokio::test]
    async fn test_class_default_is_rebranded() {
        let store = MemoryProfileStore::new();
        let template = profile("template", 0.5);
        store.save_class_default(&template).await.unwrap();

        let got = load_with_recovery(&store, AgentClass::Support, "medic", Some(&arch()), || {
            profile("medic", 9.0)
        })
        .await;
        assert_eq!(got.source, ProfileSource::ClassDefault);
        assert_eq!(got.profile.owner_id, "medic");
        assert_ne!(got.profile.profile_id, template.profile_id);
        assert_eq!(got.profile.weights[0], 0.5);
    }

    #[tokio::test]
    async fn test_wrong_architecture_goes_to_fresh() {
        let store = MemoryProfileStore::new();
        store.save(&profile("medic", 1.0)).await.unwrap();
        let other = NetworkArchitecture::dense(2, vec![7], 2);

        let got = load_with_recovery(&store, AgentClass::Support, "medic", Some(&other), || {
            profile("medic", 9.0)
        })
        .await;
        assert_eq!(got.source, ProfileSource::Fresh);
        assert_eq!(got.profile.weights[0], 9.0);
        assert!(got.had_corruption());
    }

    #[tokio::test]
    async fn test_profile_of_another_owner_is_rejected() {
        let store = MemoryProfileStore::new();
        let foreign = crate::codec::encode_profile(&profile("grunt.a", 1.0), ProfileCompression::None).unwrap();
        store.put_raw(AgentClass::Support, "grunt_a", foreign).await;

        let got = load_with_recovery(&store, AgentClass::Support, "grunt_a", Some(&arch()), || {
            profile("grunt_a", 9.0)
        })
        .await;
        assert_eq!(got.source, ProfileSource::Fresh);
        assert_eq!(got.profile.owner_id, "grunt_a");
        assert_eq!(got.failures.len(), 1);
        assert!(got.failures[0].contains("grunt.a"));
    }

    #[tokio::test]
    async fn test_first_run_is_fresh_without_failures() {
        let store = MemoryProfileStore::new();
        let got = load_with_recovery(&store, AgentClass::Support, "medic", None, || profile("medic", 2.0)).await;
        assert_eq!(got.source, ProfileSource::Fresh);
        assert!(!got.had_corruption());
    }
}
