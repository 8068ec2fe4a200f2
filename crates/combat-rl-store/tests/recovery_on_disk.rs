//! Recovery chain against a real directory

use approx::assert_abs_diff_eq;
use tempfile::TempDir;

use combat_rl_core::{AgentClass, BehaviorProfile, LearningMetrics, NetworkArchitecture};
use combat_rl_store::{
    load_with_recovery, FileProfileStore, ProfileCompression, ProfileSource, ProfileStore,
};

fn arch() -> NetworkArchitecture {
    NetworkArchitecture::dense(4, vec![6], 3)
}

#[allow(clippy::cast_precision_loss)]
fn profile(owner: &str, offset: f32) -> BehaviorProfile {
    let a = arch();
    let weights = (0..a.weight_count()).map(|i| offset + i as f32 * 0.01).collect();
    let biases = (0..a.bias_count()).map(|i| offset - i as f32 * 0.1).collect();
    BehaviorProfile::new(AgentClass::Tank, owner, a, weights, biases, LearningMetrics::default())
}

#[tokio::test]
async fn test_repeated_save_load_is_stable() {
    let dir = TempDir::new().unwrap();
    let store = FileProfileStore::new(dir.path());
    let original = profile("wall", 0.3);

    let mut current = original.clone();
    for _ in 0..5 {
        store.save(&current).await.unwrap();
        current = store.load(AgentClass::Tank, "wall").await.unwrap().unwrap();
    }
    assert_eq!(current.weights, original.weights);
    assert_eq!(current.biases, original.biases);
    assert_eq!(current.revision, 4);
    assert_eq!(current.profile_id, original.profile_id);
}

#[tokio::test]
async fn test_quantized_store_stays_within_tolerance() {
    let dir = TempDir::new().unwrap();
    let store = FileProfileStore::new(dir.path()).with_compression(ProfileCompression::QuantizedGzip);
    let original = profile("wall", -1.0);

    let mut current = original.clone();
    for _ in 0..3 {
        store.save(&current).await.unwrap();
        current = store.load(AgentClass::Tank, "wall").await.unwrap().unwrap();
    }
    let span = original.weights.iter().copied().fold(f32::NEG_INFINITY, f32::max)
        - original.weights.iter().copied().fold(f32::INFINITY, f32::min);
    for (a, b) in original.weights.iter().zip(&current.weights) {
        // each pass may add one quantisation step
        assert_abs_diff_eq!(*a, *b, epsilon = 3.0 * span / 65535.0 + 1e-6);
    }
}

#[tokio::test]
async fn test_chain_walks_every_step() {
    let dir = TempDir::new().unwrap();
    let store = FileProfileStore::new(dir.path());
    let fresh = || profile("wall", 42.0);

    store.save(&profile("wall", 1.0)).await.unwrap();
    store.save(&profile("wall", 2.0)).await.unwrap();
    store.save_class_default(&profile("template", 3.0)).await.unwrap();

    let got = load_with_recovery(&store, AgentClass::Tank, "wall", Some(&arch()), fresh).await;
    assert_eq!(got.source, ProfileSource::Primary);
    assert_abs_diff_eq!(got.profile.weights[0], 2.0);

    // flip one character inside the stored payload
    let primary = store.primary_path(AgentClass::Tank, "wall");
    let text = std::fs::read_to_string(&primary).unwrap();
    std::fs::write(&primary, text.replacen("wall", "wail", 1)).unwrap();
    let got = load_with_recovery(&store, AgentClass::Tank, "wall", Some(&arch()), fresh).await;
    assert_eq!(got.source, ProfileSource::Backup);
    assert_abs_diff_eq!(got.profile.weights[0], 1.0);

    std::fs::write(store.backup_path(AgentClass::Tank, "wall"), "").unwrap();
    let got = load_with_recovery(&store, AgentClass::Tank, "wall", Some(&arch()), fresh).await;
    assert_eq!(got.source, ProfileSource::ClassDefault);
    assert_eq!(got.profile.owner_id, "wall");
    assert_eq!(got.failures.len(), 2);

    std::fs::remove_file(store.default_path(AgentClass::Tank)).unwrap();
    let got = load_with_recovery(&store, AgentClass::Tank, "wall", Some(&arch()), fresh).await;
    assert_eq!(got.source, ProfileSource::Fresh);
    assert_abs_diff_eq!(got.profile.weights[0], 42.0);
}
