//! Virtual decryptor - randomized execution program over real and decoy ops.
//!
//! A page render is driven by a program: an ordered list of step tags with
//! a topological constraint over the five real steps
//! (`HmacVerify < RealDecrypt < CanaryCheck < EphemeralDerive <
//! DisplayMutate`). Decoy injections and dummy spins are inserted at random
//! positions so an API tracer sees a different op sequence on every render,
//! and real AES calls are interleaved with indistinguishable decoy ones.
//! Building and executing are separate, so tests run the sequential builder.

use std::hint::black_box;

use leafsafe_keyvault::crypto::{aead, wipe};
use leafsafe_keyvault::{ChapterKeyBundle, EphemeralKeyService, RuntimeEntropy, SecretBuffer};
use rand::Rng;

use crate::error::{VaultError, VaultResult};
use crate::fragment;
use crate::manifest::FragmentRecord;
use crate::mutation;

/// Program step tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    HmacVerify,
    RealDecrypt,
    CanaryCheck,
    EphemeralDerive,
    DisplayMutate,
    DecoyInject,
    DummySpin,
}

const REAL_SEQUENCE: [Step; 5] = [
    Step::HmacVerify,
    Step::RealDecrypt,
    Step::CanaryCheck,
    Step::EphemeralDerive,
    Step::DisplayMutate,
];

/// Builds decryption programs. The randomized builder is the production
/// path; the sequential one exists for deterministic execution in tests.
pub struct ProgramBuilder;

impl ProgramBuilder {
    /// Real steps in order with 2-4 decoys and 1-3 spins at uniformly
    /// random positions.
    pub fn randomized() -> Vec<Step> {
        let mut rng = rand::thread_rng();
        let mut program: Vec<Step> = REAL_SEQUENCE.to_vec();

        let decoys = rng.gen_range(2..=4);
        let spins = rng.gen_range(1..=3);
        for step in std::iter::repeat(Step::DecoyInject)
            .take(decoys)
            .chain(std::iter::repeat(Step::DummySpin).take(spins))
        {
            let position = rng.gen_range(0..=program.len());
            program.insert(position, step);
        }
        program
    }

    /// The bare real sequence, no noise.
    pub fn sequential() -> Vec<Step> {
        REAL_SEQUENCE.to_vec()
    }
}

/// Check the topological constraint: each real step exactly once, in the
/// declared relative order. Decoys and spins are unconstrained.
pub fn validate(program: &[Step]) -> VaultResult<()> {
    let real: Vec<Step> = program
        .iter()
        .copied()
        .filter(|s| !matches!(s, Step::DecoyInject | Step::DummySpin))
        .collect();
    if real != REAL_SEQUENCE {
        return Err(VaultError::ProgramPreconditionViolated(
            "real steps must appear exactly once in pipeline order".into(),
        ));
    }
    Ok(())
}

/// Inputs for one page render.
pub struct PageDecryptJob<'a> {
    pub bundle: &'a ChapterKeyBundle,
    pub image_id: &'a str,
    pub records: &'a [FragmentRecord],
    /// Raw `IV || CT || tag` blobs, aligned with `records`.
    pub blobs: &'a [Vec<u8>],
    pub ephemeral: &'a EphemeralKeyService,
    pub entropy: RuntimeEntropy,
}

/// Mutable execution state. Whatever plaintext is still held when the
/// state drops - a failed or cancelled run - gets wiped.
struct ExecutionState {
    canary_plaintexts: Vec<Vec<u8>>,
    assembled: Option<Vec<u8>>,
    ephemeral_key: Option<SecretBuffer>,
    mutated: bool,
}

impl Drop for ExecutionState {
    fn drop(&mut self) {
        wipe::wipe_collection(&mut self.canary_plaintexts);
        if let Some(ref mut assembled) = self.assembled {
            wipe::wipe(assembled);
        }
    }
}

/// Run `program` over `job`. Returns the mutated page bytes and the
/// ephemeral key needed to reverse the mutation.
pub fn execute(program: &[Step], job: &PageDecryptJob<'_>) -> VaultResult<(Vec<u8>, SecretBuffer)> {
    validate(program)?;
    if job.records.len() != job.blobs.len() {
        return Err(VaultError::ProgramPreconditionViolated(
            "fragment records and blobs are misaligned".into(),
        ));
    }

    decoy_burst();

    let mut state = ExecutionState {
        canary_plaintexts: Vec::new(),
        assembled: None,
        ephemeral_key: None,
        mutated: false,
    };

    for step in program {
        match step {
            Step::HmacVerify => {
                for (record, blob) in job.records.iter().zip(job.blobs) {
                    fragment::verify_hmac(job.bundle, record, blob)?;
                }
            }
            Step::RealDecrypt => {
                for (record, blob) in job.records.iter().zip(job.blobs) {
                    let aad = fragment::verify_aad(job.image_id, record)?;
                    let plaintext = fragment::decrypt_authenticated(job.bundle, &aad, blob)?;
                    state.canary_plaintexts.push(plaintext);
                }
            }
            Step::CanaryCheck => {
                let mut assembled = Vec::new();
                for (record, plaintext) in job
                    .records
                    .iter()
                    .zip(std::mem::take(&mut state.canary_plaintexts))
                {
                    let mut data =
                        fragment::check_and_strip_canary(job.bundle, record.index, plaintext)?;
                    assembled.extend_from_slice(&data);
                    wipe::wipe(&mut data);
                }
                state.assembled = Some(assembled);
            }
            Step::EphemeralDerive => {
                let key = job
                    .ephemeral
                    .derive_ephemeral_key(job.bundle.chapter_root(), &job.entropy)?;
                state.ephemeral_key = Some(key);
            }
            Step::DisplayMutate => {
                let assembled = state.assembled.as_mut().ok_or_else(|| {
                    VaultError::ProgramPreconditionViolated(
                        "display mutation before canary check".into(),
                    )
                })?;
                let key = state.ephemeral_key.as_ref().ok_or_else(|| {
                    VaultError::ProgramPreconditionViolated(
                        "display mutation before ephemeral derivation".into(),
                    )
                })?;
                mutation::apply(assembled, key.expose())?;
                state.mutated = true;
            }
            Step::DecoyInject => decoy_inject(),
            Step::DummySpin => dummy_spin(),
        }
    }

    decoy_burst();

    if !state.mutated {
        return Err(VaultError::ProgramIncomplete);
    }
    let mutated = state.assembled.take().unwrap_or_default();
    let key = state
        .ephemeral_key
        .take()
        .expect("mutated implies ephemeral key present");
    Ok((mutated, key))
}

/// A real AES-GCM call on throwaway key and plaintext, discarded through a
/// volatile sink. Failures are swallowed; decoys never affect the outcome.
fn decoy_inject() {
    let mut rng = rand::thread_rng();
    let key: Result<Vec<u8>, _> = aead::random_bytes(32);
    let plaintext: Result<Vec<u8>, _> = aead::random_bytes(rng.gen_range(256..2048));
    if let (Ok(key), Ok(plaintext)) = (key, plaintext) {
        if let Ok(blob) = aead::aes_gcm_encrypt(&key, &plaintext, None) {
            black_box(blob.len());
        }
    }
}

/// CPU-bound no-op with randomized iteration count to normalize timing.
fn dummy_spin() {
    let iterations = rand::thread_rng().gen_range(10_000..50_000u64);
    let mut acc = 0u64;
    for i in 0..iterations {
        acc = black_box(acc.wrapping_mul(31).wrapping_add(i));
    }
    black_box(acc);
}

fn decoy_burst() {
    let count = rand::thread_rng().gen_range(1..=2);
    for _ in 0..count {
        decoy_inject();
    }
}
