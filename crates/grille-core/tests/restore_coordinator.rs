//! Domain restore from backups over the in-memory store and rebuild channel.

mod common;

use std::collections::BTreeMap;

use common::{Fixture, TestEnv, issue_chain};
use ed25519_dalek::SigningKey;
use grille_core::{
    CERTIFICATE_DOMAIN, Delivery, HostBackup, KEY_MASTER_DOMAIN, MemoryKeyStore,
    MemoryRebuildChannel, RebuildError, RecipientSet, RestoreCoordinator, RestoreError,
};
use grille_crypto::{Fingerprint, KeyId, SecretKey};

struct Scenario {
    fixture: Fixture,
    store: MemoryKeyStore,
    channel: MemoryRebuildChannel,
    pki_instance: Fingerprint,
    secrets: BTreeMap<&'static str, Vec<(KeyId, SecretKey)>>,
}

impl Scenario {
    fn new(seed: u64) -> Self {
        let fixture = Fixture::new(seed, 2);
        let store = MemoryKeyStore::new();
        let mut secrets = BTreeMap::new();

        for domain in [CERTIFICATE_DOMAIN, KEY_MASTER_DOMAIN] {
            let mut keys = BTreeMap::new();
            let mut recovered = Vec::new();
            for _ in 0..2 {
                let (secret, signature) = fixture.wrapped_key(&[domain]);
                recovered.push((signature.key_id(), secret));
                keys.insert(signature.key_id(), signature);
            }
            let forged = fixture.forged_key(&[domain]);
            keys.insert(forged.key_id(), forged);

            store.insert_backup(HostBackup {
                host: "fichiers-1".to_string(),
                domain: domain.to_string(),
                keys,
                stats: None,
            });
            secrets.insert(domain, recovered);
        }

        let channel = MemoryRebuildChannel::new();
        let pki_key = SigningKey::from_bytes(&fixture.env.bytes32());
        let chain = issue_chain(&fixture.ca, "corepki-1", &pki_key, &["core"]);
        channel.set_certificate(CERTIFICATE_DOMAIN, chain.encode().unwrap());
        let pki_instance = Fingerprint::of(&pki_key.verifying_key());

        Self { fixture, store, channel, pki_instance, secrets }
    }

    fn coordinator(
        &self,
        recipients: RecipientSet,
    ) -> RestoreCoordinator<MemoryKeyStore, MemoryRebuildChannel, TestEnv> {
        RestoreCoordinator::new(
            self.store.clone(),
            self.channel.clone(),
            self.fixture.env.clone(),
            self.fixture.root.public_key(),
            recipients,
        )
    }
}

#[tokio::test]
async fn certificate_domain_is_probed_before_sealing() {
    let scenario = Scenario::new(40);
    let coordinator = scenario.coordinator(scenario.fixture.recipients());

    let result = coordinator
        .restore_initial_domain(CERTIFICATE_DOMAIN, &scenario.fixture.root, false)
        .await
        .unwrap();

    assert!(result.ok);
    assert_eq!(result.keys, 2);
    assert_eq!(scenario.channel.probes(), vec![CERTIFICATE_DOMAIN.to_string()]);

    let commands = scenario.channel.commands();
    let (domain, envelope) = &commands[0];
    assert_eq!(domain, CERTIFICATE_DOMAIN);
    assert!(envelope.keys.contains_key(&scenario.pki_instance));
    assert!(envelope.keys.contains_key(&Fingerprint::of(&scenario.fixture.root.public_key())));
    for custodian in &scenario.fixture.custodians {
        assert!(envelope.keys.contains_key(custodian.certificate.fingerprint()));
    }

    let plaintext = envelope.open_with_root(&scenario.fixture.root).unwrap();
    let command: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
    let keys = command["keys"].as_object().unwrap();
    assert_eq!(keys.len(), 2);
    for (key_id, secret) in &scenario.secrets[CERTIFICATE_DOMAIN] {
        assert_eq!(keys[key_id.as_str()], secret.to_base64().as_str());
    }
}

#[tokio::test]
async fn key_master_domain_is_not_probed() {
    let scenario = Scenario::new(41);
    let coordinator = scenario.coordinator(scenario.fixture.recipients());

    let result = coordinator
        .restore_initial_domain(KEY_MASTER_DOMAIN, &scenario.fixture.root, false)
        .await
        .unwrap();

    assert!(result.ok);
    assert!(scenario.channel.probes().is_empty());
    let (_, envelope) = &scenario.channel.commands()[0];
    assert!(!envelope.keys.contains_key(&scenario.pki_instance));
}

#[tokio::test]
async fn resubmission_sends_each_key_alone_with_acknowledgement() {
    let scenario = Scenario::new(42);
    let coordinator = scenario.coordinator(scenario.fixture.recipients());

    coordinator
        .restore_initial_domain(KEY_MASTER_DOMAIN, &scenario.fixture.root, true)
        .await
        .unwrap();

    let submissions = scenario.store.submissions();
    assert_eq!(submissions.len(), 2);
    assert!(submissions.iter().all(|s| s.keys == 1 && s.delivery == Delivery::Acknowledged));
    for (key_id, _) in &scenario.secrets[KEY_MASTER_DOMAIN] {
        assert_eq!(scenario.store.holders(key_id).len(), 2);
    }
}

#[tokio::test]
async fn resubmission_needs_recipients() {
    let scenario = Scenario::new(43);
    let coordinator = scenario.coordinator(RecipientSet::new());

    let err = coordinator
        .restore_initial_domain(KEY_MASTER_DOMAIN, &scenario.fixture.root, true)
        .await
        .unwrap_err();

    assert_eq!(err, RestoreError::NoRecipients);
    assert!(scenario.channel.commands().is_empty());
}

#[tokio::test]
async fn rejected_command_is_a_result_not_an_error() {
    let scenario = Scenario::new(44);
    scenario.channel.reject_commands("already initialized");
    let coordinator = scenario.coordinator(scenario.fixture.recipients());

    let result = coordinator
        .restore_initial_domain(KEY_MASTER_DOMAIN, &scenario.fixture.root, false)
        .await
        .unwrap();

    assert!(!result.ok);
    assert_eq!(result.err.as_deref(), Some("already initialized"));
}

#[tokio::test]
async fn undelivered_command_does_not_stop_the_next_domain() {
    let scenario = Scenario::new(45);
    scenario.channel.fail_transport(true);
    let coordinator = scenario.coordinator(scenario.fixture.recipients());

    let results =
        coordinator.restore_initial_domains(&scenario.fixture.root, false).await.unwrap();

    let domains: Vec<&str> = results.iter().map(|r| r.domain.as_str()).collect();
    assert_eq!(domains, vec![CERTIFICATE_DOMAIN, KEY_MASTER_DOMAIN]);
    assert!(results.iter().all(|r| !r.ok && r.err.is_some()));
}

#[tokio::test]
async fn failed_probe_aborts_the_domain() {
    let fixture = Fixture::new(46, 1);
    let channel = MemoryRebuildChannel::new();
    let coordinator = RestoreCoordinator::new(
        MemoryKeyStore::new(),
        channel.clone(),
        fixture.env.clone(),
        fixture.root.public_key(),
        fixture.recipients(),
    );

    let err = coordinator
        .restore_initial_domain(CERTIFICATE_DOMAIN, &fixture.root, false)
        .await
        .unwrap_err();

    assert_eq!(err, RestoreError::Probe(RebuildError::NoCertificate(CERTIFICATE_DOMAIN.to_string())));
    assert!(channel.commands().is_empty());
}

#[tokio::test]
async fn untrusted_domain_certificate_is_refused() {
    let scenario = Scenario::new(47);
    let stranger = SigningKey::from_bytes(&[0x21; 32]);
    let instance = SigningKey::from_bytes(&[0x22; 32]);
    let chain = issue_chain(&stranger, "corepki-1", &instance, &["core"]);
    scenario.channel.set_certificate(CERTIFICATE_DOMAIN, chain.encode().unwrap());
    let env = TestEnv::with_seed(470);
    let coordinator = RestoreCoordinator::new(
        scenario.store.clone(),
        scenario.channel.clone(),
        env.clone(),
        scenario.fixture.root.public_key(),
        scenario.fixture.recipients(),
    );

    let err = coordinator
        .restore_initial_domain(CERTIFICATE_DOMAIN, &scenario.fixture.root, false)
        .await
        .unwrap_err();

    assert!(matches!(err, RestoreError::UntrustedDomain(_)));
    assert!(scenario.channel.commands().is_empty());
    // Nothing was sealed: the environment's RNG is untouched
    assert_eq!(env.bytes32(), TestEnv::with_seed(470).bytes32());
}
