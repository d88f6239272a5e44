use crate::comm::config::CommConfig;
use crate::comm::error::{CommError, CommInitError};
use crate::comm::protocol::{
    decode_envelope, decode_header, encode_request_ack, encode_response,
};
use crate::comm::types::{Envelope, MsgType, PromptRequest, PromptResponse};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Sequence deduplication entry
#[derive(Debug)]
struct DedupEntry {
    /// When this entry was created
    instant: Instant,
    /// Cached response to resend if duplicate
    cached_response: Option<Vec<u8>>,
}

/// Prompt channel server - receives enveloped prompts over UDP, forwards
/// them to the conversation manager, and sends enveloped responses back.
pub struct Comm {
    socket: UdpSocket,
    config: CommConfig,
    /// Forwards inbound prompts to the conversation manager
    prompt_tx: mpsc::Sender<PromptRequest>,
    /// Sequence deduplication table per client
    dedup: Arc<tokio::sync::Mutex<HashMap<SocketAddr, HashMap<u32, DedupEntry>>>>,
}

impl Comm {
    /// Get local socket address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Create a new Comm instance and bind the UDP socket.
    /// Returns the comm instance and the receiver the conversation manager
    /// consumes.
    pub async fn new(
        config: CommConfig,
    ) -> StdResult<(Comm, mpsc::Receiver<PromptRequest>), CommInitError> {
        let socket = UdpSocket::bind(config.bind_addr())
            .await
            .map_err(|e| CommInitError::BindFailed(e.to_string()))?;

        info!("prompt channel listening on {}", socket.local_addr().unwrap());

        let (tx, rx) = mpsc::channel(1024);

        Ok((
            Self {
                socket,
                config,
                prompt_tx: tx,
                dedup: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            },
            rx,
        ))
    }

    /// Run the server loop.
    pub async fn run(self) -> StdResult<(), CommError> {
        let mut buf = vec![0u8; self.config.max_payload_bytes + 1024]; // Extra space for header
        let mut cleanup_interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            let packet = &buf[..len];
                            if let Err(e) = self.handle_packet(packet, addr).await {
                                warn!("failed to handle packet from {}: {}", addr, e);
                            }
                        }
                        Err(e) => {
                            error!("recv error: {}", e);
                            return Err(CommError::RecvError(e.to_string()));
                        }
                    }
                }
                _ = cleanup_interval.tick() => {
                    self.cleanup_dedup().await;
                }
            }
        }
    }

    async fn handle_packet(
        &self,
        packet: &[u8],
        client_addr: SocketAddr,
    ) -> StdResult<(), CommError> {
        // Minimum: type + seq = 5 bytes
        if packet.len() < 5 {
            warn!(
                "truncated packet from {}: only {} bytes",
                client_addr,
                packet.len()
            );
            return Err(CommError::DecodeError("Packet too short".to_string()));
        }

        let payload_len = packet.len() - 5;
        if payload_len > self.config.max_payload_bytes {
            warn!(
                "payload too large from {}: {} bytes",
                client_addr, payload_len
            );
            return Err(CommError::PayloadTooLarge(payload_len));
        }

        let (msg_type, seq) = decode_header(packet)?;
        let payload = &packet[5..];

        debug!(
            "received type={} from {} seq={}",
            msg_type as u8, client_addr, seq
        );

        match msg_type {
            MsgType::Request => self.handle_request(payload, seq, client_addr).await,
            _ => {
                warn!(
                    "unexpected message type {} from {}",
                    msg_type as u8, client_addr
                );
                Ok(())
            }
        }
    }

    async fn handle_request(
        &self,
        payload_bytes: &[u8],
        seq: u32,
        client_addr: SocketAddr,
    ) -> Result<(), CommError> {
        let envelope = decode_envelope(payload_bytes)?;

        // Anything not addressed to the agent as a new prompt is ignored.
        if !envelope.is_inbound_prompt() {
            debug!(
                recipient = %envelope.recipient,
                kind = %envelope.kind,
                "ignoring message not addressed to the agent"
            );
            return Ok(());
        }

        // Duplicate handling: resend the cached response, or re-ack while
        // the original request is still being processed.
        {
            let mut dedup = self.dedup.lock().await;
            let client_entries = dedup.entry(client_addr).or_insert_with(HashMap::new);

            if client_entries.len() >= self.config.dedup_capacity {
                let oldest_seq = client_entries
                    .iter()
                    .min_by_key(|(_, e)| e.instant)
                    .map(|(seq, _)| *seq);
                if let Some(seq_to_remove) = oldest_seq {
                    client_entries.remove(&seq_to_remove);
                    debug!(
                        "dedup table at capacity, removed oldest entry seq={}",
                        seq_to_remove
                    );
                }
            }

            if let Some(entry) = client_entries.get(&seq) {
                let resend = entry.cached_response.clone();
                drop(dedup);
                match resend {
                    Some(cached) => {
                        info!(
                            "duplicate request seq={} from {}, resending cached response",
                            seq, client_addr
                        );
                        self.socket
                            .send_to(&cached, client_addr)
                            .await
                            .map_err(|e| CommError::SendError(e.to_string()))?;
                    }
                    None => {
                        debug!(
                            "duplicate request seq={} from {} still in flight, re-acking",
                            seq, client_addr
                        );
                        let ack = encode_request_ack(seq)?;
                        self.socket
                            .send_to(&ack, client_addr)
                            .await
                            .map_err(|e| CommError::SendError(e.to_string()))?;
                    }
                }
                return Ok(());
            }

            // New request: create the dedup entry before processing so
            // duplicates arriving mid-turn are recognized.
            client_entries.insert(
                seq,
                DedupEntry {
                    instant: Instant::now(),
                    cached_response: None,
                },
            );
        }

        info!(
            "new prompt seq={} from {} conversation={} prompt_len={}",
            seq,
            client_addr,
            envelope.payload.conversation_id,
            envelope.payload.prompt.len()
        );

        // Ack immediately
        let ack = encode_request_ack(seq)?;
        self.socket
            .send_to(&ack, client_addr)
            .await
            .map_err(|e| CommError::SendError(e.to_string()))?;
        debug!("sent REQUEST_ACK seq={} to {}", seq, client_addr);

        let (reply_tx, reply_rx) = oneshot::channel::<PromptResponse>();
        let prompt_request = PromptRequest {
            conversation_id: envelope.payload.conversation_id.clone(),
            prompt: envelope.payload.prompt,
            reply: reply_tx,
            source_addr: client_addr,
        };

        if self.prompt_tx.send(prompt_request).await.is_err() {
            error!("failed to forward prompt: conversation manager is gone");
            let response = Envelope::agent_response(
                envelope.payload.conversation_id,
                "Internal server error",
            );
            let packet = encode_response(seq, &response)?;
            self.socket
                .send_to(&packet, client_addr)
                .await
                .map_err(|e| CommError::SendError(e.to_string()))?;
            return Err(CommError::ChannelClosed);
        }

        // Wait for the turn to complete
        let waited = timeout(
            Duration::from_secs(self.config.response_timeout_secs),
            reply_rx,
        )
        .await;

        let response_envelope = match waited {
            Ok(Ok(response)) => {
                if response.is_error {
                    warn!(
                        conversation = %response.conversation_id,
                        "turn ended with an error response"
                    );
                }
                Envelope::agent_response(response.conversation_id, response.text)
            }
            Ok(Err(_)) => {
                warn!("reply channel closed without a response for seq={}", seq);
                Envelope::agent_response(
                    envelope.payload.conversation_id,
                    "No response from handler",
                )
            }
            Err(_) => {
                warn!("timeout waiting for response for seq={}", seq);
                Envelope::agent_response(envelope.payload.conversation_id, "Response timeout")
            }
        };

        let response_bytes = encode_response(seq, &response_envelope)?;
        self.socket
            .send_to(&response_bytes, client_addr)
            .await
            .map_err(|e| CommError::SendError(e.to_string()))?;

        // Cache the response for deduplication
        {
            let mut dedup = self.dedup.lock().await;
            if let Some(client_entries) = dedup.get_mut(&client_addr) {
                client_entries.insert(
                    seq,
                    DedupEntry {
                        instant: Instant::now(),
                        cached_response: Some(response_bytes),
                    },
                );
            }
        }
        debug!("sent RESPONSE seq={} to {}", seq, client_addr);

        Ok(())
    }

    /// Cleanup expired entries from the deduplication table
    async fn cleanup_dedup(&self) {
        let mut dedup = self.dedup.lock().await;
        let ttl = Duration::from_secs(self.config.dedup_ttl_secs);
        let now = Instant::now();

        for (_addr, entries) in dedup.iter_mut() {
            entries.retain(|_seq, entry| now.duration_since(entry.instant) < ttl);
        }

        dedup.retain(|_addr, entries| !entries.is_empty());

        debug!("dedup table cleaned, {} clients tracked", dedup.len());
    }
}
