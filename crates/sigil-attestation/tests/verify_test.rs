//! Integration tests for artifact verification against manifests, proofs
//! and ledger state.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use anyhow::Result;
use sigil_attestation::{hash_bytes, Manifest, ProofBundle, SealedBatch, Verdict};
use sigil_core::{Digest, LedgerError, RecordKey};
use sigil_ledger::AttestOutcome;
use sigil_testing::{fixtures::SCENARIO_BATCH_ID, ArtifactDir, TestEnv};

async fn sealed_and_anchored(env: &TestEnv) -> Result<(ArtifactDir, SealedBatch)> {
    let artifacts = ArtifactDir::scenario()?;
    let batch = env.sealer().seal(artifacts.path(), SCENARIO_BATCH_ID).await?;
    let outcome = env
        .client()
        .submit(env.fingerprint, batch.manifest.attestation_date(), batch.manifest.root, SCENARIO_BATCH_ID)
        .await?;
    assert!(matches!(outcome, AttestOutcome::Attested { .. }));
    Ok((artifacts, batch))
}

fn bundle(batch: &SealedBatch, path: &str) -> ProofBundle {
    batch.manifest.bundle_from_tree(&batch.tree, path).unwrap()
}

fn key(env: &TestEnv, manifest: &Manifest) -> RecordKey {
    RecordKey::new(env.fingerprint, manifest.attestation_date())
}

#[tokio::test]
async fn anchored_artifact_is_verified() -> Result<()> {
    let env = TestEnv::new().await?;
    let (artifacts, batch) = sealed_and_anchored(&env).await?;

    for path in ["a", "b", "c", "d"] {
        let verdict = env
            .verifier()
            .verify_bundle(&artifacts.read(path)?, &batch.manifest, &bundle(&batch, path), &key(&env, &batch.manifest))
            .await?;
        assert_eq!(verdict, Verdict::Verified, "artifact {path}");
        assert_eq!(verdict.exit_code(), 0);
    }
    Ok(())
}

#[tokio::test]
async fn modified_artifact_is_hash_mismatch() -> Result<()> {
    let env = TestEnv::new().await?;
    let (_artifacts, batch) = sealed_and_anchored(&env).await?;

    let verdict = env
        .verifier()
        .verify_bundle(b"hullo", &batch.manifest, &bundle(&batch, "a"), &key(&env, &batch.manifest))
        .await?;

    assert_eq!(
        verdict,
        Verdict::HashMismatch { expected: Some(hash_bytes(b"hello")), actual: hash_bytes(b"hullo") }
    );
    assert_eq!(verdict.exit_code(), 1);
    Ok(())
}

#[tokio::test]
async fn unanchored_batch_is_not_anchored() -> Result<()> {
    let env = TestEnv::new().await?;
    let artifacts = ArtifactDir::scenario()?;
    let batch = env.sealer().seal(artifacts.path(), SCENARIO_BATCH_ID).await?;

    let verdict = env
        .verifier()
        .verify_bundle(b"hello", &batch.manifest, &bundle(&batch, "a"), &key(&env, &batch.manifest))
        .await?;

    assert_eq!(verdict, Verdict::NotAnchored { anchored_root: None });
    assert_eq!(verdict.exit_code(), 2);
    Ok(())
}

#[tokio::test]
async fn different_anchored_root_is_not_anchored() -> Result<()> {
    let env = TestEnv::new().await?;
    let artifacts = ArtifactDir::scenario()?;
    let batch = env.sealer().seal(artifacts.path(), SCENARIO_BATCH_ID).await?;
    let other_root = Digest::of(b"some other batch");
    env.client().submit(env.fingerprint, batch.manifest.attestation_date(), other_root, "build-6").await?;

    let verdict = env
        .verifier()
        .verify_bundle(b"hello", &batch.manifest, &bundle(&batch, "a"), &key(&env, &batch.manifest))
        .await?;

    assert_eq!(verdict, Verdict::NotAnchored { anchored_root: Some(other_root) });
    Ok(())
}

#[tokio::test]
async fn tampered_proof_is_proof_invalid() -> Result<()> {
    let env = TestEnv::new().await?;
    let (_artifacts, batch) = sealed_and_anchored(&env).await?;
    let mut tampered = bundle(&batch, "a");
    tampered.proof.steps[0].sibling = Digest::of(b"forged");

    let verdict = env
        .verifier()
        .verify_bundle(b"hello", &batch.manifest, &tampered, &key(&env, &batch.manifest))
        .await?;

    assert_eq!(verdict, Verdict::ProofInvalid);
    Ok(())
}

#[tokio::test]
async fn corrupt_manifest_is_proof_invalid() -> Result<()> {
    let env = TestEnv::new().await?;
    let (_artifacts, batch) = sealed_and_anchored(&env).await?;
    let mut manifest = batch.manifest.clone();
    manifest.entries[0].leaf_hash = hash_bytes(b"hullo");

    let verdict = env
        .verifier()
        .verify_bundle(b"hullo", &manifest, &bundle(&batch, "a"), &key(&env, &batch.manifest))
        .await?;

    assert_eq!(verdict, Verdict::ProofInvalid);
    Ok(())
}

#[tokio::test]
async fn artifact_missing_from_manifest_is_hash_mismatch() -> Result<()> {
    let env = TestEnv::new().await?;
    let (_artifacts, batch) = sealed_and_anchored(&env).await?;
    let mut stray = bundle(&batch, "a");
    stray.path = "not-sealed".to_string();

    let verdict = env
        .verifier()
        .verify_bundle(b"hello", &batch.manifest, &stray, &key(&env, &batch.manifest))
        .await?;

    assert_eq!(verdict, Verdict::HashMismatch { expected: None, actual: hash_bytes(b"hello") });
    Ok(())
}

#[tokio::test]
async fn bundle_from_other_batch_is_proof_invalid() -> Result<()> {
    let env = TestEnv::new().await?;
    let (artifacts, batch) = sealed_and_anchored(&env).await?;
    artifacts.write("e", "extra")?;
    let other = env.sealer().seal(artifacts.path(), "build-8").await?;

    let verdict = env
        .verifier()
        .verify_bundle(b"hello", &batch.manifest, &bundle(&other, "a"), &key(&env, &batch.manifest))
        .await?;

    assert_eq!(verdict, Verdict::ProofInvalid);
    Ok(())
}

#[tokio::test]
async fn ledger_failure_is_an_error_not_a_verdict() -> Result<()> {
    let env = TestEnv::new().await?;
    let (_artifacts, batch) = sealed_and_anchored(&env).await?;
    env.ledger.fail_next(1, LedgerError::rpc_transient("node down")).await;

    let result = env
        .verifier()
        .verify_bundle(b"hello", &batch.manifest, &bundle(&batch, "a"), &key(&env, &batch.manifest))
        .await;

    assert!(matches!(result, Err(LedgerError::RpcTransient { .. })));
    Ok(())
}
