use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use cutify_contracts::assets::{build_mint_metadata, mint_name, MintSuccess, NftReference};
use cutify_contracts::errors::{classify_failure, user_message_for, FailureCategory};
use cutify_contracts::events::{EventPayload, EventWriter};
use cutify_contracts::workflow::Workflow;

use crate::chain::MutationContract;
use crate::fetch::image_bytes_from_url;
use crate::host::{best_effort, HostRuntime, ImpactKind, NotificationKind};
use crate::storage::ContentStorage;
use crate::{error_chain_text, truncate_text};

/// Public URL of the app, embedded in share posts.
pub const APP_URL: &str = "https://halloween-ten-blond.vercel.app";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintOutcome {
    /// Pipeline ran to completion; the success record is also stored on
    /// the workflow.
    Completed(MintSuccess),
    /// Pipeline aborted; the message is already user-safe.
    Failed {
        user_message: String,
        category: FailureCategory,
    },
    /// Guard refused: nothing mintable right now, or a mint is already
    /// in flight.
    NotReady,
}

/// The full mint pipeline: materialize the mutated image, pin image and
/// metadata, then submit the mint transaction. Any step failing aborts
/// the rest; the single-flight guard is released on every path.
pub fn run_mint(
    workflow: &mut Workflow,
    contract: &dyn MutationContract,
    storage: &dyn ContentStorage,
    host: &dyn HostRuntime,
    http: &HttpClient,
    events: &EventWriter,
) -> Result<MintOutcome> {
    let Some(source) = workflow.active().cloned() else {
        return Ok(MintOutcome::NotReady);
    };
    let Some(mutated_image_url) = workflow
        .mutation
        .result()
        .map(|result| result.mutated_image_url.clone())
    else {
        return Ok(MintOutcome::NotReady);
    };
    if !workflow.begin_mint() {
        return Ok(MintOutcome::NotReady);
    }

    best_effort(events, "haptic_impact", host.haptic_impact(ImpactKind::Medium));
    emit_started(events, &source)?;

    let outcome = execute(contract, storage, http, &source, &mutated_image_url);
    workflow.finish_mint();

    match outcome {
        Ok(success) => {
            best_effort(
                events,
                "haptic_notification",
                host.haptic_notification(NotificationKind::Success),
            );
            emit_succeeded(events, &success)?;
            workflow.set_mint_success(success.clone());
            Ok(MintOutcome::Completed(success))
        }
        Err(err) => {
            best_effort(
                events,
                "haptic_notification",
                host.haptic_notification(NotificationKind::Error),
            );
            let raw = error_chain_text(&err, 512);
            emit_failed(events, &raw)?;
            Ok(MintOutcome::Failed {
                user_message: user_message_for(&raw),
                category: classify_failure(&raw),
            })
        }
    }
}

fn execute(
    contract: &dyn MutationContract,
    storage: &dyn ContentStorage,
    http: &HttpClient,
    source: &NftReference,
    mutated_image_url: &str,
) -> Result<MintSuccess> {
    let image = image_bytes_from_url(http, mutated_image_url)
        .context("failed materializing the cutified image")?;
    if image.bytes.is_empty() {
        bail!("cutified image is empty");
    }

    let image_uri = storage
        .upload_image(&image.bytes, &image.mime_type)
        .map_err(|err| anyhow::anyhow!(err.0))?;

    let metadata = build_mint_metadata(source, &image_uri);
    let metadata_uri = storage
        .upload_metadata(&metadata)
        .map_err(|err| anyhow::anyhow!(err.0))?;

    let receipt = contract
        .mint(&source.contract_address, &source.token_id, &metadata_uri)
        .map_err(|err| anyhow::anyhow!(err.0))?;

    Ok(MintSuccess {
        hash: receipt.hash,
        token_id: receipt.token_id,
        image_uri,
        name: mint_name(source),
    })
}

/// Success line for the frontend, with the transaction hash shortened
/// for display.
pub fn success_message(success: &MintSuccess) -> String {
    format!("{} minted! Tx: {}", success.name, short_hash(&success.hash))
}

pub fn short_hash(hash: &str) -> String {
    if hash.len() <= 10 {
        return hash.to_string();
    }
    format!("{}…", &hash[..10])
}

/// Share-post text for a minted cutified NFT; the app URL rides along
/// as the embed.
pub fn share_text(success: &MintSuccess) -> String {
    format!(
        "I just turned my Warplet into {} 🎃✨ Cutify yours too!",
        success.name
    )
}

/// Embeds for the share post: the minted image and the app link.
pub fn share_embeds(success: &MintSuccess) -> Vec<String> {
    vec![success.image_uri.clone(), APP_URL.to_string()]
}

fn emit_started(events: &EventWriter, source: &NftReference) -> Result<()> {
    let mut payload = EventPayload::new();
    payload.insert(
        "source_token_id".to_string(),
        Value::String(source.token_id.clone()),
    );
    payload.insert(
        "source_contract".to_string(),
        Value::String(source.contract_address.clone()),
    );
    events.emit("mint_started", payload)?;
    Ok(())
}

fn emit_succeeded(events: &EventWriter, success: &MintSuccess) -> Result<()> {
    let mut payload = EventPayload::new();
    payload.insert("hash".to_string(), Value::String(success.hash.clone()));
    payload.insert(
        "token_id".to_string(),
        success
            .token_id
            .map(Value::from)
            .unwrap_or(Value::Null),
    );
    payload.insert(
        "image_uri".to_string(),
        Value::String(success.image_uri.clone()),
    );
    events.emit("mint_succeeded", payload)?;
    Ok(())
}

fn emit_failed(events: &EventWriter, raw: &str) -> Result<()> {
    let mut payload = EventPayload::new();
    payload.insert(
        "error".to_string(),
        Value::String(truncate_text(raw, 512)),
    );
    events.emit("mint_failed", payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use reqwest::blocking::Client as HttpClient;
    use serde_json::Value;

    use cutify_contracts::assets::{NftAttribute, NftReference};
    use cutify_contracts::errors::{FailureCategory, MintError, QueryError, UploadError, WithdrawError};
    use cutify_contracts::events::EventWriter;
    use cutify_contracts::mutation::MutationResult;
    use cutify_contracts::workflow::Workflow;

    use crate::chain::{MintReceipt, MutationContract};
    use crate::fetch::data_url_from_bytes;
    use crate::host::{HostRuntime, ImpactKind, NotificationKind, NullHost};
    use crate::storage::ContentStorage;

    use super::{run_mint, share_text, short_hash, success_message, MintOutcome};

    #[derive(Clone, Default)]
    struct RecordingHost {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl HostRuntime for RecordingHost {
        fn is_hosted(&self) -> anyhow::Result<bool> {
            Ok(true)
        }

        fn signal_ready(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn request_install(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn haptic_impact(&self, kind: ImpactKind) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("impact:{}", kind.as_str()));
            Ok(())
        }

        fn haptic_notification(&self, kind: NotificationKind) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("notify:{}", kind.as_str()));
            Ok(())
        }

        fn compose_share(&self, _text: &str, _embeds: &[String]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeStorage {
        fail_image_upload: bool,
        uploads: Mutex<Vec<String>>,
    }

    impl ContentStorage for FakeStorage {
        fn upload_image(&self, _bytes: &[u8], _mime_type: &str) -> Result<String, UploadError> {
            if self.fail_image_upload {
                return Err(UploadError("pin service unavailable".to_string()));
            }
            self.uploads.lock().unwrap().push("image".to_string());
            Ok("ipfs://image".to_string())
        }

        fn upload_metadata(&self, _metadata: &Value) -> Result<String, UploadError> {
            self.uploads.lock().unwrap().push("metadata".to_string());
            Ok("ipfs://metadata".to_string())
        }
    }

    #[derive(Default)]
    struct FakeContract {
        fail_with: Option<String>,
        mints: Mutex<Vec<String>>,
    }

    impl MutationContract for FakeContract {
        fn owner(&self) -> Result<String, QueryError> {
            Ok("0xowner".to_string())
        }

        fn mutation_fee(&self) -> Result<u128, QueryError> {
            Ok(370_000_000_000_000)
        }

        fn treasury_balance(&self) -> Result<u128, QueryError> {
            Ok(0)
        }

        fn mint(
            &self,
            _origin_contract: &str,
            origin_token_id: &str,
            metadata_uri: &str,
        ) -> Result<MintReceipt, MintError> {
            if let Some(message) = &self.fail_with {
                return Err(MintError(message.clone()));
            }
            self.mints
                .lock()
                .unwrap()
                .push(format!("{origin_token_id}:{metadata_uri}"));
            Ok(MintReceipt {
                hash: "0x1234567890abcdef".to_string(),
                token_id: Some(9),
            })
        }

        fn withdraw(&self) -> Result<String, WithdrawError> {
            Ok("0xwithdraw".to_string())
        }
    }

    fn ready_workflow() -> Workflow {
        let mut workflow = Workflow::new();
        workflow.resolve_environment(true);
        workflow.set_connected("0xabc");
        workflow.apply_owned_assets(vec![NftReference {
            token_id: "42".to_string(),
            contract_address: cutify_contracts::assets::COLLECTION_CONTRACT.to_string(),
            name: "Warplet #42".to_string(),
            description: String::new(),
            image: "https://example.com/42.png".to_string(),
            attributes: vec![NftAttribute::new("Background", "Violet")],
        }]);
        let token = workflow.mutation.begin_generation();
        workflow.mutation.complete(
            token,
            MutationResult {
                mutated_image_url: data_url_from_bytes(b"cute-pixels", "image/png"),
                image_generation_service: "dryrun".to_string(),
            },
        );
        workflow
    }

    fn events() -> anyhow::Result<(tempfile::TempDir, EventWriter)> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-test");
        Ok((temp, writer))
    }

    #[test]
    fn full_pipeline_mints_and_records_success() -> anyhow::Result<()> {
        let (_temp, events) = events()?;
        let mut workflow = ready_workflow();
        let storage = FakeStorage::default();
        let contract = FakeContract::default();

        let outcome = run_mint(
            &mut workflow,
            &contract,
            &storage,
            &NullHost,
            &HttpClient::new(),
            &events,
        )?;

        let MintOutcome::Completed(success) = outcome else {
            anyhow::bail!("expected completed mint");
        };
        assert_eq!(success.name, "Cutified Warplet #42");
        assert_eq!(success.token_id, Some(9));
        assert_eq!(success.image_uri, "ipfs://image");
        assert_eq!(
            *contract.mints.lock().unwrap(),
            vec!["42:ipfs://metadata".to_string()]
        );
        assert!(workflow.mint_success().is_some());
        assert!(!workflow.is_minting());
        Ok(())
    }

    #[test]
    fn image_upload_failure_aborts_before_metadata() -> anyhow::Result<()> {
        let (_temp, events) = events()?;
        let mut workflow = ready_workflow();
        let storage = FakeStorage {
            fail_image_upload: true,
            ..FakeStorage::default()
        };
        let contract = FakeContract::default();

        let outcome = run_mint(
            &mut workflow,
            &contract,
            &storage,
            &NullHost,
            &HttpClient::new(),
            &events,
        )?;

        let MintOutcome::Failed { category, .. } = outcome else {
            anyhow::bail!("expected failed mint");
        };
        assert_eq!(category, FailureCategory::Other);
        // No metadata upload, no mint call, guard released.
        assert!(storage.uploads.lock().unwrap().is_empty());
        assert!(contract.mints.lock().unwrap().is_empty());
        assert!(workflow.mint_success().is_none());
        assert!(!workflow.is_minting());
        Ok(())
    }

    #[test]
    fn user_rejection_maps_to_the_cancelled_message() -> anyhow::Result<()> {
        let (_temp, events) = events()?;
        let mut workflow = ready_workflow();
        let storage = FakeStorage::default();
        let contract = FakeContract {
            fail_with: Some("User rejected the request.".to_string()),
            ..FakeContract::default()
        };
        let host = RecordingHost::default();

        let outcome = run_mint(
            &mut workflow,
            &contract,
            &storage,
            &host,
            &HttpClient::new(),
            &events,
        )?;

        assert_eq!(
            outcome,
            MintOutcome::Failed {
                user_message: "Transaction cancelled.".to_string(),
                category: FailureCategory::Cancelled,
            }
        );
        assert!(!workflow.is_minting());

        // Start cue fired, then the error notification.
        let calls = host.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["impact:medium".to_string(), "notify:error".to_string()]);
        Ok(())
    }

    #[test]
    fn guard_refuses_without_a_ready_mutation() -> anyhow::Result<()> {
        let (_temp, events) = events()?;
        let mut workflow = Workflow::new();
        workflow.resolve_environment(true);
        workflow.set_connected("0xabc");

        let outcome = run_mint(
            &mut workflow,
            &FakeContract::default(),
            &FakeStorage::default(),
            &NullHost,
            &HttpClient::new(),
            &events,
        )?;
        assert_eq!(outcome, MintOutcome::NotReady);
        Ok(())
    }

    #[test]
    fn display_helpers() {
        let success = cutify_contracts::assets::MintSuccess {
            hash: "0x1234567890abcdef".to_string(),
            token_id: Some(9),
            image_uri: "ipfs://image".to_string(),
            name: "Cutified Warplet #42".to_string(),
        };
        assert_eq!(
            success_message(&success),
            "Cutified Warplet #42 minted! Tx: 0x12345678…"
        );
        assert_eq!(short_hash("0xabc"), "0xabc");
        assert!(share_text(&success).contains("Cutified Warplet #42"));
    }
}
