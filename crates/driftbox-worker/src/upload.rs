//! Upload pipeline: cached blob → presigned write → commit → local metadata patch.

use crate::context::{storage_error, transport_error, TransferContext};
use driftbox_core::{
    ActionHook, FileMeta, FileTransfer, PolicyDecision, TransferDirection, TransferError,
    UploadPolicyInput,
};
use driftbox_storage::{CommitUploadRequest, PresignUploadRequest, UploadCommitMeta};

#[tracing::instrument(
    skip(ctx, transfer),
    fields(transfer.id = %transfer.id, hash = %transfer.hash)
)]
pub async fn run(ctx: &TransferContext<'_>, transfer: &FileTransfer) -> Result<u64, TransferError> {
    let hash = transfer.hash.as_str();
    let meta = ctx
        .store
        .call(move |s| async move { s.get_file_meta(hash).await })
        .await?
        .ok_or_else(|| TransferError::FileNotFound(format!("no local metadata for {hash}")))?;
    let blob = ctx
        .store
        .call(move |s| async move { s.get_blob(hash).await })
        .await?
        .ok_or_else(|| TransferError::FileNotFound(format!("no cached blob for {hash}")))?;

    let decision = ctx.hooks.check_upload_policy(&UploadPolicyInput {
        hash: meta.hash.clone(),
        mime_type: meta.mime_type.clone(),
        size_bytes: meta.size_bytes,
    });
    if let PolicyDecision::Reject(reason) = decision {
        return Err(TransferError::FileValidation(reason));
    }

    if !ctx.provider.capabilities().presigned_upload {
        return Err(TransferError::ProviderError(format!(
            "provider {} cannot presign uploads",
            ctx.provider.id()
        )));
    }

    ctx.emit(ActionHook::UploadBefore, transfer, None, None);
    let options = ctx.presign_options(transfer);

    let size = blob.size_bytes();
    let request = PresignUploadRequest {
        workspace_id: transfer.workspace_id.clone(),
        hash: transfer.hash.clone(),
        mime_type: meta.mime_type.clone(),
        size_bytes: size,
        expires_in_ms: Some(options.expires_in_ms),
        disposition: options.disposition,
    };
    let target = ctx
        .cancellable(ctx.provider.presign_upload(&request))
        .await?
        .map_err(|e| storage_error(e, TransferDirection::Upload))?;

    ctx.write_progress(transfer, 0, size).await;

    let response = ctx
        .cancellable(ctx.transport.upload(&target, blob.data.clone(), ctx.cancel.clone()))
        .await?
        .map_err(|e| transport_error(e, TransferDirection::Upload))?;

    if response.status == 413 {
        return Err(TransferError::FileTooLarge(format!(
            "upload of {size} bytes rejected with status 413"
        )));
    }
    if !response.is_success() {
        return Err(TransferError::UploadFailed(format!(
            "upload returned status {}",
            response.status
        )));
    }

    let storage_id = target
        .storage_id
        .clone()
        .or_else(|| storage_id_from_body(&response.body))
        .ok_or_else(|| {
            TransferError::ProviderError("backend did not return a storage id".to_string())
        })?;

    if ctx.provider.capabilities().commit_upload {
        let commit = CommitUploadRequest {
            workspace_id: transfer.workspace_id.clone(),
            hash: transfer.hash.clone(),
            storage_id: storage_id.clone(),
            meta: commit_meta(&meta),
            storage_provider_id: Some(ctx.provider.id().to_string()),
        };
        ctx.cancellable(ctx.provider.commit_upload(&commit))
            .await?
            .map_err(|e| storage_error(e, TransferDirection::Upload))?;
    }

    let provider_id = ctx.provider.id();
    let committed = storage_id.as_str();
    ctx.store
        .call(move |s| async move {
            s.commit_storage_location(hash, committed, Some(provider_id))
                .await
        })
        .await?;

    ctx.write_progress(transfer, size, size).await;
    tracing::info!(storage_id = %storage_id, bytes = size, "Upload committed");
    ctx.emit(ActionHook::UploadAfter, transfer, Some(storage_id), Some(size));

    Ok(size)
}

fn commit_meta(meta: &FileMeta) -> UploadCommitMeta {
    UploadCommitMeta {
        name: meta.name.clone(),
        mime_type: meta.mime_type.clone(),
        size_bytes: meta.size_bytes,
        kind: meta.kind,
        width: meta.width,
        height: meta.height,
        page_count: meta.page_count,
    }
}

fn storage_id_from_body(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("storageId")
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
