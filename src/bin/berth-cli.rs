//! Berth CLI client
//!
//! A command-line client that talks to the berth agent over UDP.
//! Uses rustyline for readline-style editing and history.

use clap::Parser;
use rmp_serde::decode::Deserializer;
use rmp_serde::encode::Serializer;
use rustyline::history::FileHistory;
use rustyline::Editor;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Message types
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum MsgType {
    Request = 0x01,
    RequestAck = 0x02,
    Response = 0x03,
}

/// Message envelope (matches the agent's prompt channel contract)
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    recipient: String,
    #[serde(rename = "type")]
    kind: String,
    payload: PromptPayload,
}

#[derive(Debug, Serialize, Deserialize)]
struct PromptPayload {
    conversation_id: String,
    prompt: String,
}

/// CLI arguments
#[derive(Debug, Parser)]
#[command(name = "berth-cli")]
#[command(about = "Berth agent CLI client")]
struct Args {
    /// Agent address (e.g., 127.0.0.1:9700)
    #[arg(short, long, default_value = "127.0.0.1:9700")]
    target: SocketAddr,

    /// Conversation id (a fresh one is generated when omitted)
    #[arg(short, long)]
    conversation_id: Option<String>,

    /// ACK timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    /// How long to wait for a full response in seconds
    #[arg(long, default_value = "300")]
    response_timeout: u64,

    /// Maximum retry attempts
    #[arg(short, long, default_value = "3")]
    max_retries: u32,

    /// History file path
    #[arg(long)]
    history_file: Option<PathBuf>,
}

/// CLI configuration
#[derive(Debug, Clone)]
struct Config {
    target: SocketAddr,
    conversation_id: String,
    ack_timeout_secs: u64,
    response_timeout_secs: u64,
    max_retries: u32,
    history_file: PathBuf,
}

impl Config {
    fn from_args(args: Args) -> Self {
        let history_file = args.history_file.unwrap_or_else(|| {
            dirs::home_dir()
                .map(|p| p.join(".berth_history"))
                .unwrap_or_else(|| PathBuf::from(".berth_history"))
        });

        let conversation_id = args.conversation_id.unwrap_or_else(|| {
            format!("cli-{}", uuid::Uuid::new_v4().simple())
        });

        Self {
            target: args.target,
            conversation_id,
            ack_timeout_secs: args.timeout,
            response_timeout_secs: args.response_timeout,
            max_retries: args.max_retries,
            history_file,
        }
    }
}

/// Main client state
struct Client {
    socket: UdpSocket,
    config: Config,
    seq: AtomicU32,
}

impl Client {
    async fn new(config: Config) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        Ok(Self {
            socket,
            config,
            seq: AtomicU32::new(1),
        })
    }

    /// Send a prompt and wait for the agent's response
    async fn send_prompt(&self, prompt: String) -> io::Result<String> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);

        let envelope = Envelope {
            recipient: "agent".to_string(),
            kind: "new_prompt".to_string(),
            payload: PromptPayload {
                conversation_id: self.config.conversation_id.clone(),
                prompt,
            },
        };

        let mut payload_bytes = Vec::new();
        let mut ser = Serializer::new(&mut payload_bytes).with_struct_map();
        envelope
            .serialize(&mut ser)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // Packet: type (1) + seq (4) + payload
        let mut packet = vec![MsgType::Request as u8];
        packet.extend_from_slice(&seq.to_be_bytes());
        packet.extend_from_slice(&payload_bytes);

        for _attempt in 0..self.config.max_retries {
            self.socket.send_to(&packet, self.config.target).await?;

            match self.wait_for_ack(seq).await {
                Ok(true) => match self.wait_for_response(seq).await {
                    Ok(text) => return Ok(text),
                    Err(_) => {
                        eprintln!("[warning] Response timeout, retrying...");
                        continue;
                    }
                },
                Ok(false) => continue,
                Err(_) => continue,
            }
        }

        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "agent not responding",
        ))
    }

    /// Wait for REQUEST_ACK
    async fn wait_for_ack(&self, expected_seq: u32) -> io::Result<bool> {
        let mut buf = [0u8; 1024];

        match timeout(
            Duration::from_secs(self.config.ack_timeout_secs),
            self.socket.recv_from(&mut buf),
        )
        .await
        {
            Ok(Ok((len, addr))) => {
                if addr != self.config.target || len < 5 {
                    return Ok(false);
                }

                let msg_type = buf[0];
                let seq = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);

                Ok(msg_type == MsgType::RequestAck as u8 && seq == expected_seq)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(false), // Timeout
        }
    }

    /// Wait for RESPONSE
    async fn wait_for_response(&self, expected_seq: u32) -> io::Result<String> {
        let mut buf = [0u8; 65536];

        // Turns with tool calls can take a while
        match timeout(
            Duration::from_secs(self.config.response_timeout_secs),
            self.socket.recv_from(&mut buf),
        )
        .await
        {
            Ok(Ok((len, addr))) => {
                if addr != self.config.target {
                    return Err(io::Error::other("Unexpected sender"));
                }

                if len < 5 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Packet too short",
                    ));
                }

                let msg_type = buf[0];
                let seq = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);

                if msg_type != MsgType::Response as u8 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Not a response packet",
                    ));
                }

                if seq != expected_seq {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Sequence mismatch",
                    ));
                }

                let mut de = Deserializer::new(&buf[5..len]);
                let envelope: Envelope = Deserialize::deserialize(&mut de)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

                Ok(envelope.payload.prompt)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "Response timeout")),
        }
    }
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    let config = Config::from_args(args);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async { run_client(config).await })
}

async fn run_client(config: Config) -> io::Result<()> {
    let client = Client::new(config.clone()).await?;

    let mut rl: Editor<(), FileHistory> = Editor::new().map_err(io::Error::other)?;

    if config.history_file.exists() {
        if let Err(e) = rl.load_history(&config.history_file) {
            eprintln!("[warning] Failed to load history: {}", e);
        }
    }

    println!("berth-cli v{}", env!("CARGO_PKG_VERSION"));
    println!("Target: {}", client.config.target);
    println!("Conversation: {}", client.config.conversation_id);
    println!("Type your message and press Enter. Ctrl+D to quit.");
    println!();

    loop {
        let readline = rl.readline("> ");

        match readline {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(input);

                print!("[waiting...]");
                io::stdout().flush()?;

                match client.send_prompt(input.to_string()).await {
                    Ok(response) => {
                        print!("\r");
                        println!("{}", response);
                    }
                    Err(e) => {
                        print!("\r");
                        println!("[error] {}", e);
                    }
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                break;
            }
            Err(e) => {
                eprintln!("[error] Readline error: {}", e);
                break;
            }
        }
    }

    if let Err(e) = rl.save_history(&config.history_file) {
        eprintln!("[warning] Failed to save history: {}", e);
    }

    println!("\nGoodbye!");
    Ok(())
}
