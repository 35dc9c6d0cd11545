//! Test server management.
//!
//! Spawns and manages nmdcd instances for integration testing.

#![allow(dead_code)]

use std::net::TcpStream as StdTcpStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tokio::time::sleep;

/// A test server instance backed by a real daemon process.
pub struct TestServer {
    child: Child,
    port: u16,
    data_dir: PathBuf,
}

impl TestServer {
    /// Spawn a server with extra config appended to the test baseline.
    pub async fn spawn(port: u16, extra_config: &str) -> anyhow::Result<Self> {
        let data_dir = std::env::temp_dir().join(format!("nmdcd-test-{port}"));
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join("config.toml");
        let config_content = format!(
            r#"
[server]
name = "test.hub"
listen = ["127.0.0.1:{port}"]
metrics_port = 0

[timeouts]
key = 30
valnick = 30
login = 60
myinfo = 30

{extra_config}
"#
        );
        std::fs::write(&config_path, config_content)?;

        let child = Command::new(env!("CARGO_BIN_EXE_nmdcd"))
            .arg(config_path.as_os_str())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let server = TestServer {
            child,
            port,
            data_dir,
        };

        server.wait_ready().await?;
        Ok(server)
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    async fn wait_ready(&self) -> anyhow::Result<()> {
        for _ in 0..100 {
            if StdTcpStream::connect_timeout(
                &self.address().parse().unwrap(),
                Duration::from_millis(100),
            )
            .is_ok()
            {
                return Ok(());
            }

            sleep(Duration::from_millis(50)).await;
        }

        anyhow::bail!("server did not come up on port {}", self.port)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}
