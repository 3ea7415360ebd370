// ABOUTME: SSH bastion container helper for integration tests.
// ABOUTME: Uses bollard to run OpenSSH servers with TCP forwarding, shared or owned by one test.

use bollard::Docker;
use bollard::exec::{StartExecOptions, StartExecResults};
use bollard::models::ContainerCreateBody;
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, RemoveContainerOptions, StopContainerOptions,
};
use futures::StreamExt;
use kvtunnel::ssh::{Credential, HostKeyPolicy, TunnelConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

const IMAGE: &str = "lscr.io/linuxserver/openssh-server:latest";
/// Enables AllowTcpForwarding in the image's sshd_config.
const TUNNEL_MOD: &str = "linuxserver/mods:openssh-server-ssh-tunnel";
const SSH_PORT: u16 = 2222;
pub const TEST_USER: &str = "testuser";
pub const TEST_PASSWORD: &str = "tunnel-test-password";
/// Name under which the container reaches the host running the tests.
pub const HOST_GATEWAY: &str = "host.docker.internal";

/// Containers started by this test binary, removed on exit.
static CONTAINER_IDS: Mutex<Vec<String>> = parking_lot::const_mutex(Vec::new());

static CONTAINER_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Cleanup on process exit.
#[ctor::dtor]
fn cleanup_on_exit() {
    let ids: Vec<String> = CONTAINER_IDS.lock().drain(..).collect();
    if ids.is_empty() {
        return;
    }
    let Ok(rt) = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    else {
        return;
    };
    rt.block_on(async {
        if let Ok(docker) = Docker::connect_with_local_defaults() {
            for id in &ids {
                let _ = docker
                    .stop_container(id, None::<StopContainerOptions>)
                    .await;
                let _ = docker
                    .remove_container(
                        id,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await;
            }
        }
    });
}

/// Shared SSH container for all tests.
static SHARED_CONTAINER: tokio::sync::OnceCell<SshContainer> = tokio::sync::OnceCell::const_new();

/// Get the shared SSH container, starting it if needed.
pub async fn shared_container() -> &'static SshContainer {
    SHARED_CONTAINER
        .get_or_init(|| async {
            SshContainer::start()
                .await
                .expect("failed to start SSH container")
        })
        .await
}

/// Start a container owned by one test, for tests that break sessions.
pub async fn dedicated_container() -> SshContainer {
    SshContainer::start()
        .await
        .expect("failed to start SSH container")
}

/// Running SSH container with connection details.
pub struct SshContainer {
    id: String,
    port: u16,
}

impl SshContainer {
    async fn start() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let docker = Docker::connect_with_local_defaults()?;

        let public_key = std::fs::read_to_string(format!("{}.pub", test_key_path()))?;

        // Pull image if needed
        let mut pull_stream = docker.create_image(
            Some(CreateImageOptions {
                from_image: Some(IMAGE.to_string()),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(result) = pull_stream.next().await {
            result?;
        }

        let port = super::closed_port().await;

        let container_name = format!(
            "kvtunnel-ssh-test-{}-{}",
            std::process::id(),
            CONTAINER_SEQ.fetch_add(1, Ordering::SeqCst)
        );
        let env = vec![
            "PUID=1000".to_string(),
            "PGID=1000".to_string(),
            format!("USER_NAME={}", TEST_USER),
            format!("PUBLIC_KEY={}", public_key.trim()),
            "PASSWORD_ACCESS=true".to_string(),
            format!("USER_PASSWORD={}", TEST_PASSWORD),
            format!("DOCKER_MODS={}", TUNNEL_MOD),
        ];

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            format!("{}/tcp", SSH_PORT),
            Some(vec![bollard::models::PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(port.to_string()),
            }]),
        );

        let host_config = bollard::models::HostConfig {
            port_bindings: Some(port_bindings),
            extra_hosts: Some(vec![format!("{}:host-gateway", HOST_GATEWAY)]),
            ..Default::default()
        };

        let config = ContainerCreateBody {
            image: Some(IMAGE.to_string()),
            env: Some(env),
            host_config: Some(host_config),
            ..Default::default()
        };

        let container = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(container_name),
                    ..Default::default()
                }),
                config,
            )
            .await?;

        CONTAINER_IDS.lock().push(container.id.clone());

        docker
            .start_container(
                &container.id,
                None::<bollard::query_parameters::StartContainerOptions>,
            )
            .await?;

        Self::wait_for_ssh(port).await?;

        Ok(Self {
            id: container.id,
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Key-file tunnel config for this container.
    pub fn key_config(&self) -> TunnelConfig {
        TunnelConfig::new("127.0.0.1", TEST_USER, Credential::key_file(test_key_path()))
            .port(self.port)
            .host_key_policy(HostKeyPolicy::AcceptAny)
    }

    /// Password tunnel config for this container.
    pub fn password_config(&self) -> TunnelConfig {
        TunnelConfig::new("127.0.0.1", TEST_USER, Credential::password(TEST_PASSWORD))
            .port(self.port)
            .host_key_policy(HostKeyPolicy::AcceptAny)
    }

    /// Kill the sshd processes serving `TEST_USER`, dropping every live session.
    /// The listening daemon keeps running.
    pub async fn kill_sessions(&self) {
        let docker = Docker::connect_with_local_defaults().expect("docker connection");
        let exec = docker
            .create_exec(
                &self.id,
                bollard::models::ExecConfig {
                    cmd: Some(vec![
                        "pkill".to_string(),
                        "-f".to_string(),
                        format!("sshd.*{}", TEST_USER),
                    ]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .expect("create pkill exec");

        let result = docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    ..Default::default()
                }),
            )
            .await
            .expect("start pkill exec");
        if let StartExecResults::Attached { mut output, .. } = result {
            while output.next().await.is_some() {}
        }
    }

    async fn wait_for_ssh(port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        use tokio::io::AsyncReadExt;

        let addr = format!("127.0.0.1:{}", port);
        // Mods are installed before sshd starts, so allow extra time.
        for _ in 0..180 {
            if let Ok(mut stream) = tokio::net::TcpStream::connect(&addr).await {
                // Try to read SSH banner to confirm SSH is actually ready
                let mut buf = [0u8; 32];
                match tokio::time::timeout(std::time::Duration::from_secs(2), stream.read(&mut buf))
                    .await
                {
                    Ok(Ok(n)) if n > 0 => {
                        let banner = String::from_utf8_lossy(&buf[..n]);
                        if banner.starts_with("SSH-") {
                            // SSH is ready, give it a moment to stabilize
                            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                            return Ok(());
                        }
                    }
                    _ => {}
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
        Err("SSH container did not become ready in time".into())
    }
}

pub fn test_key_path() -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    format!("{}/tests/fixtures/test_key", manifest_dir)
}
