//! Scenarios shared by the repository test suites. Each takes a repository
//! and a prefix that keeps its policy ids apart from other tests.

#![allow(dead_code, clippy::unwrap_used)]

use auth_policy::*;

pub fn policy_id(prefix: &str, name: &str) -> String {
    format!("{prefix}-{name}")
}

fn sorted_ids(policies: &[PolicyRecord]) -> Vec<String> {
    let mut ids: Vec<String> = policies.iter().map(|policy| policy.id.clone()).collect();
    ids.sort();
    ids
}

pub async fn round_trip(repo: &dyn PolicyRepository, prefix: &str) {
    let id = policy_id(prefix, "round-trip");
    let policy = PolicyRecord::new(&id, Effect::Deny)
        .with_description("Nurses may not export records")
        .with_subjects(["roles:nurse", "users:<[0-9]+>"])
        .with_resources(["records:<.+>:export", "records:archive"])
        .with_permissions(["export", "<(download|print)>"])
        .with_condition(Condition::new("ip_range").with_option("cidr", "10.0.0.0/8"));

    repo.create(&policy).await.unwrap();
    let stored = repo.get(&id).await.unwrap();

    assert_eq!(stored, policy);
    repo.delete(&id).await.unwrap();
}

pub async fn round_trip_without_conditions(repo: &dyn PolicyRepository, prefix: &str) {
    let id = policy_id(prefix, "no-conditions");
    let policy = PolicyRecord::new(&id, Effect::Allow)
        .with_subjects(["users:alice"])
        .with_resources(["articles:1"])
        .with_permissions(["view"]);

    repo.create(&policy).await.unwrap();
    let stored = repo.get(&id).await.unwrap();

    assert!(stored.conditions.is_empty());
    assert_eq!(stored.description, "");
    assert_eq!(stored, policy);
    repo.delete(&id).await.unwrap();
}

pub async fn global_policy_matches_every_subject(repo: &dyn PolicyRepository, prefix: &str) {
    let id = policy_id(prefix, "global");
    let policy = PolicyRecord::new(&id, Effect::Deny)
        .with_resources(["maintenance:<.*>"])
        .with_permissions(["write"]);
    repo.create(&policy).await.unwrap();

    for subject in ["users:alice", "groups:admins", "", "anything at all"] {
        let found = repo.find_by_subject(subject).await.unwrap();
        assert!(
            found.iter().any(|policy| policy.id == id),
            "global policy must apply to {subject:?}"
        );
    }
    assert!(repo.find_global_policies().await.unwrap().contains(&id));

    repo.delete(&id).await.unwrap();
}

pub async fn subject_pattern_matching(repo: &dyn PolicyRepository, prefix: &str) {
    let id = policy_id(prefix, "numeric");
    let policy = PolicyRecord::new(&id, Effect::Allow)
        .with_subjects(["<[0-9]+>"])
        .with_permissions(["view"]);
    repo.create(&policy).await.unwrap();

    let numeric = repo.find_by_subject("123").await.unwrap();
    assert!(numeric.iter().any(|policy| policy.id == id));

    let alphabetic = repo.find_by_subject("abc").await.unwrap();
    assert!(alphabetic.iter().all(|policy| policy.id != id));

    // Anchored: a partial match is no match.
    let mixed = repo.find_by_subject("123abc").await.unwrap();
    assert!(mixed.iter().all(|policy| policy.id != id));

    repo.delete(&id).await.unwrap();
}

pub async fn literal_text_is_not_a_pattern(repo: &dyn PolicyRepository, prefix: &str) {
    let id = policy_id(prefix, "literal");
    let policy = PolicyRecord::new(&id, Effect::Allow).with_subjects(["users:a.b"]);
    repo.create(&policy).await.unwrap();

    let exact = repo.find_subject_matches("users:a.b").await.unwrap();
    assert!(exact.contains(&id));
    let wildcard = repo.find_subject_matches("users:aXb").await.unwrap();
    assert!(!wildcard.contains(&id));

    repo.delete(&id).await.unwrap();
}

pub async fn failed_create_leaves_nothing(repo: &dyn PolicyRepository, prefix: &str) {
    let id = policy_id(prefix, "atomic");
    let policy = PolicyRecord::new(&id, Effect::Allow)
        .with_subjects(["users:<.+>"])
        .with_permissions(["view"])
        .with_resources(["articles:1", "articles:<[0-9>"]);

    let error = repo.create(&policy).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Compile);

    let lookup = repo.get(&id).await.unwrap_err();
    assert!(lookup.is_not_found());
    let matches = repo.find_subject_matches("users:alice").await.unwrap();
    assert!(!matches.contains(&id));
}

pub async fn duplicate_id_is_rejected(repo: &dyn PolicyRepository, prefix: &str) {
    let id = policy_id(prefix, "duplicate");
    let first = PolicyRecord::new(&id, Effect::Allow).with_subjects(["users:alice"]);
    let second = PolicyRecord::new(&id, Effect::Deny).with_subjects(["users:bob"]);

    repo.create(&first).await.unwrap();
    let error = repo.create(&second).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Backend);

    let stored = repo.get(&id).await.unwrap();
    assert_eq!(stored, first);
    repo.delete(&id).await.unwrap();
}

pub async fn delete_is_idempotent(repo: &dyn PolicyRepository, prefix: &str) {
    let id = policy_id(prefix, "delete");
    let policy = PolicyRecord::new(&id, Effect::Allow)
        .with_subjects(["users:alice"])
        .with_resources(["articles:1"]);
    repo.create(&policy).await.unwrap();

    repo.delete(&id).await.unwrap();
    assert!(repo.get(&id).await.unwrap_err().is_not_found());

    repo.delete(&id).await.unwrap();
    assert!(repo.get(&id).await.unwrap_err().is_not_found());

    // Link rows went with the policy.
    let matches = repo.find_subject_matches("users:alice").await.unwrap();
    assert!(!matches.contains(&id));
}

pub async fn example_scenario(repo: &dyn PolicyRepository, prefix: &str) {
    let id = policy_id(prefix, "p1");
    let policy = PolicyRecord::new(&id, Effect::Allow)
        .with_subjects(["users:<.+>"])
        .with_resources(["articles:1"])
        .with_permissions(["view"]);
    repo.create(&policy).await.unwrap();

    let globals = repo.find_global_policies().await.unwrap();

    let alice = repo.find_by_subject("users:alice").await.unwrap();
    let mut expected = globals.clone();
    expected.push(id.clone());
    expected.sort();
    assert_eq!(sorted_ids(&alice), expected);

    let group = repo.find_by_subject("groups:alice").await.unwrap();
    let mut expected = globals;
    expected.sort();
    assert_eq!(sorted_ids(&group), expected);

    repo.delete(&id).await.unwrap();
}

pub async fn custom_delimiters(repo: &dyn PolicyRepository, prefix: &str) {
    let id = policy_id(prefix, "delimiters");
    let policy = PolicyRecord::new(&id, Effect::Allow)
        .with_delimiters('{', '}')
        .with_subjects(["devices:{[a-f0-9]{8}}"]);
    repo.create(&policy).await.unwrap();

    let matches = repo.find_subject_matches("devices:deadbeef").await.unwrap();
    assert!(matches.contains(&id));
    let too_short = repo.find_subject_matches("devices:beef").await.unwrap();
    assert!(!too_short.contains(&id));

    // Delimiters are a compile-time setting and are not stored.
    let stored = repo.get(&id).await.unwrap();
    assert_eq!(stored.start_delimiter, '<');
    assert!(stored.subjects.contains("devices:{[a-f0-9]{8}}"));

    repo.delete(&id).await.unwrap();
}
