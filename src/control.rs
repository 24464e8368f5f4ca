//! Single-key runtime controls read from the console.

use std::io::Read;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use crate::preprocess::FilterMode;

const ESC: char = '\u{1b}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    SetFilter(FilterMode),
    Quit,
}

impl ControlCommand {
    /// `0`-`4` pick a filter, `q` or ESC quit. Anything else is ignored.
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'q' | 'Q' | ESC => Some(Self::Quit),
            c => FilterMode::from_digit(c).map(Self::SetFilter),
        }
    }
}

/// Non-blocking source of control commands
pub struct ControlChannel {
    rx: Receiver<char>,
}

impl ControlChannel {
    pub fn new() -> (Sender<char>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }

    pub fn from_receiver(rx: Receiver<char>) -> Self {
        Self { rx }
    }

    /// Spawn a reader thread that forwards every stdin character. Keys arrive
    /// once the terminal flushes a line.
    pub fn stdin() -> Self {
        let (tx, channel) = Self::new();
        std::thread::spawn(move || {
            let mut buf = [0u8; 64];
            let mut stdin = std::io::stdin();
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        for &b in &buf[..n] {
                            if tx.send(b as char).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
            tracing::debug!("stdin reader stopped");
        });
        channel
    }

    /// Drain everything received since the last call.
    pub fn poll(&self) -> Vec<ControlCommand> {
        let mut commands = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(c) => commands.extend(ControlCommand::from_code(c)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        commands
    }
}
