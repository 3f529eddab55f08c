use async_trait::async_trait;
use slotter_control::{Messenger, SendError};

/// Messenger that prints to the terminal instead of a chat service. Every
/// message lands on the operator's screen, whatever chat id it targets.
pub(crate) struct ConsoleMessenger;

#[async_trait]
impl Messenger for ConsoleMessenger {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), SendError> {
        println!("📨 [chat {chat_id}] {text}");
        Ok(())
    }
}

/// Lines typed by the operator, read on a plain thread so the async runtime
/// never blocks on stdin.
pub(crate) fn stdin_lines() -> tokio::sync::mpsc::UnboundedReceiver<String> {
    use std::io::BufRead;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
