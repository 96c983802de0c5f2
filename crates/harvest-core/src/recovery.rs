//! Startup recovery: re-deliver every document left in a `sent != true`
//! state by a crash or restart, bypassing SerializeTag/Compress since the
//! document is already serialized by definition of being in the store.
//! Sweeps every namespace in the shared SQLite file.

use crate::socket_sender::SocketSender;
use harvest_store::Store;
use std::sync::Arc;
use std::time::Duration;

const INTER_DOCUMENT_DELAY: Duration = Duration::from_secs(1);

/// Walk every namespace's unsent documents, deliver each directly through
/// `sender`, and mark it sent on success. Errors for one document are
/// logged and do not stop the sweep.
pub async fn recover_unsent_documents(store: &Arc<Store>, sender: &Arc<SocketSender>) -> Result<(), harvest_store::StoreError> {
    for namespace in store.documents.namespaces()? {
        for doc in store.documents.unsent(&namespace)? {
            let payload = match serde_json::to_vec(&doc) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(namespace = %namespace, id = %doc.id, error = %e, "failed to serialize document during recovery");
                    continue;
                }
            };

            match sender.send(&payload).await {
                Ok(()) => {
                    if let Err(e) = store.documents.mark_sent(&namespace, &doc.id) {
                        tracing::error!(namespace = %namespace, id = %doc.id, error = %e, "failed to mark document sent during recovery");
                    }
                }
                Err(e) => {
                    tracing::error!(namespace = %namespace, id = %doc.id, error = %e, "failed to deliver document during recovery");
                }
            }

            tokio::time::sleep(INTER_DOCUMENT_DELAY).await;
        }
    }
    Ok(())
}
