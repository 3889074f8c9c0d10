//! Download pipeline: presigned read → streamed digest check → cached blob.

use crate::context::{storage_error, transport_error, TransferContext};
use bytes::BytesMut;
use driftbox_core::{
    ActionHook, ContentHash, FileBlob, FileTransfer, TransferDirection, TransferError,
};
use driftbox_storage::PresignDownloadRequest;
use futures::StreamExt;
use tokio::time::Instant;

#[tracing::instrument(
    skip(ctx, transfer),
    fields(transfer.id = %transfer.id, hash = %transfer.hash)
)]
pub async fn run(ctx: &TransferContext<'_>, transfer: &FileTransfer) -> Result<u64, TransferError> {
    let hash = transfer.hash.as_str();
    let expected = ContentHash::parse(hash)?;
    let meta = ctx
        .store
        .call(move |s| async move { s.get_file_meta(hash).await })
        .await?
        .ok_or_else(|| TransferError::FileNotFound(format!("no local metadata for {hash}")))?;
    let storage_id = meta.storage_id.clone().ok_or_else(|| {
        TransferError::FileNotFound(format!("{hash} has not been uploaded to remote storage"))
    })?;

    if !ctx.provider.capabilities().presigned_download {
        return Err(TransferError::ProviderError(format!(
            "provider {} cannot presign downloads",
            ctx.provider.id()
        )));
    }

    ctx.emit(ActionHook::DownloadBefore, transfer, Some(storage_id.clone()), None);
    let options = ctx.presign_options(transfer);

    let request = PresignDownloadRequest {
        workspace_id: transfer.workspace_id.clone(),
        hash: transfer.hash.clone(),
        storage_id: Some(storage_id.clone()),
        expires_in_ms: Some(options.expires_in_ms),
        disposition: options.disposition,
    };
    let target = ctx
        .cancellable(ctx.provider.presign_download(&request))
        .await?
        .map_err(|e| storage_error(e, TransferDirection::Download))?;

    let response = ctx
        .cancellable(ctx.transport.download(&target, ctx.cancel.clone()))
        .await?
        .map_err(|e| transport_error(e, TransferDirection::Download))?;
    if !response.is_success() {
        return Err(TransferError::DownloadFailed(format!(
            "download returned status {}",
            response.status
        )));
    }

    let total = response.content_length.unwrap_or(meta.size_bytes);
    let mut buffer = BytesMut::with_capacity(usize::try_from(total).unwrap_or(0).min(64 << 20));
    let mut hasher = expected.hasher();
    let mut stream = response.stream;
    let mut last_progress = Instant::now();

    ctx.write_progress(transfer, 0, total).await;
    while let Some(chunk) = ctx.cancellable(stream.next()).await? {
        let chunk = chunk.map_err(|e| transport_error(e, TransferDirection::Download))?;
        hasher.update(&chunk);
        buffer.extend_from_slice(&chunk);

        if last_progress.elapsed() >= ctx.config.progress_throttle {
            last_progress = Instant::now();
            let received = buffer.len() as u64;
            ctx.write_progress(transfer, received, total.max(received)).await;
        }
    }
    // A transport that stops the stream on cancellation looks like a clean end.
    if ctx.cancel.is_cancelled() {
        return Err(TransferError::Cancelled("transfer cancelled".to_string()));
    }

    let actual = hasher.finalize();
    if actual != expected {
        tracing::warn!(
            expected = %expected,
            actual = %actual,
            "Downloaded bytes do not match content hash"
        );
        return Err(TransferError::DownloadFailed(format!(
            "hash mismatch: expected {expected}, got {actual}"
        )));
    }

    let blob = FileBlob::new(hash, buffer.freeze());
    let size = blob.size_bytes();
    ctx.store
        .call(|s| {
            let blob = &blob;
            async move { s.put_blob(blob).await }
        })
        .await?;

    ctx.write_progress(transfer, size, size).await;
    tracing::info!(bytes = size, "Download verified and cached");
    ctx.emit(ActionHook::DownloadAfter, transfer, Some(storage_id), Some(size));

    Ok(size)
}
