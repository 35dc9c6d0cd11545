//! A minimal hub-protocol test client.

#![allow(dead_code)]

use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Frame-by-frame client over one TCP connection.
pub struct TestClient {
    stream: TcpStream,
    buf: Vec<u8>,
    pub nick: String,
}

impl TestClient {
    pub async fn connect(addr: &str) -> anyhow::Result<TestClient> {
        let stream = TcpStream::connect(addr).await?;

        Ok(TestClient {
            stream,
            buf: Vec::new(),
            nick: String::new(),
        })
    }

    /// Send one frame; the terminator is appended.
    pub async fn send(&mut self, frame: &str) -> anyhow::Result<()> {
        self.stream.write_all(frame.as_bytes()).await?;
        self.stream.write_all(b"|").await?;
        Ok(())
    }

    pub async fn send_bytes(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.write_all(b"|").await?;
        Ok(())
    }

    /// Next frame within `wait`, terminator stripped.
    pub async fn recv(&mut self, wait: Duration) -> anyhow::Result<String> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'|') {
                let frame: Vec<u8> = self.buf.drain(..=pos).collect();
                return Ok(String::from_utf8_lossy(&frame[..frame.len() - 1]).into_owned());
            }

            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .context("timed out waiting for a frame")?;

            let mut chunk = [0u8; 4096];
            let n = timeout(remaining, self.stream.read(&mut chunk))
                .await
                .context("timed out waiting for a frame")??;

            if n == 0 {
                bail!("connection closed");
            }

            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read frames until one contains `needle`.
    pub async fn expect(&mut self, needle: &str, wait: Duration) -> anyhow::Result<String> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .with_context(|| format!("timed out waiting for frame containing {needle:?}"))?;

            let frame = self.recv(remaining).await?;

            if frame.contains(needle) {
                return Ok(frame);
            }
        }
    }

    /// Assert that nothing containing `needle` arrives within `wait`.
    pub async fn expect_silence(&mut self, needle: &str, wait: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now())
            else {
                return Ok(());
            };

            match self.recv(remaining).await {
                Ok(frame) if frame.contains(needle) => {
                    bail!("unexpected frame: {frame}")
                }
                Ok(_) => continue,
                // Timeouts and closes both mean nothing matched.
                Err(_) => return Ok(()),
            }
        }
    }

    /// Answer the lock challenge and announce features.
    pub async fn handshake(&mut self, supports: &str) -> anyhow::Result<()> {
        let lock_frame = self.expect("$Lock ", Duration::from_secs(5)).await?;
        let rest = lock_frame
            .strip_prefix("$Lock ")
            .context("malformed lock frame")?;
        let lock = rest.split(" Pk=").next().context("malformed lock frame")?;

        let key = nmdc_proto::lock::key_for_lock(lock.as_bytes());
        let mut frame = b"$Key ".to_vec();
        frame.extend_from_slice(&key);
        self.send_bytes(&frame).await?;

        self.send(&format!("$Supports {supports}")).await?;
        Ok(())
    }

    /// Run the full password-less login pipeline.
    pub async fn login(
        &mut self,
        nick: &str,
        supports: &str,
        mode: char,
        share: u64,
    ) -> anyhow::Result<()> {
        self.nick = nick.to_string();
        self.handshake(supports).await?;

        self.send(&format!("$ValidateNick {nick}")).await?;
        self.expect(&format!("$Hello {nick}"), Duration::from_secs(5))
            .await?;

        self.send("$Version 1,0091").await?;
        self.send(&self::my_info(nick, mode, share)).await?;

        // Own MyINFO comes back once the user is listed.
        self.expect(&format!("$MyINFO $ALL {nick} "), Duration::from_secs(5))
            .await?;
        Ok(())
    }
}

/// A plausible MyINFO frame for tests.
pub fn my_info(nick: &str, mode: char, share: u64) -> String {
    format!("$MyINFO $ALL {nick} testing <++ V:0.868,M:{mode},H:0/0/1,S:3>$ $100\u{1}$${share}$")
}
