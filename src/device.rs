use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, Semaphore};
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{BridgeConfig, Config, FixtureConfig};
use crate::fixture::{Fixture, FixtureController, FIXTURES};
use crate::{Error, Result};

/// Attempts per bridge command before giving up
const MAX_RETRIES: u8 = 3;

/// Pause between two attempts of the same command
const RETRY_DELAY: Duration = Duration::from_millis(300);

/// Command queue to serialise bridge commands with rate limiting
struct CommandQueue {
    /// Semaphore to limit command concurrency
    semaphore: Semaphore,
    /// Minimum delay between commands
    min_delay: Duration,
    /// Last command timestamp
    last_command: Mutex<std::time::Instant>,
}

impl CommandQueue {
    fn new(min_delay_ms: u64) -> Self {
        let min_delay = Duration::from_millis(min_delay_ms);
        let now = std::time::Instant::now();
        Self {
            semaphore: Semaphore::new(1), // Only allow one command at a time
            min_delay,
            last_command: Mutex::new(now.checked_sub(min_delay).unwrap_or(now)),
        }
    }

    async fn execute<T, F>(&self, future: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        // Acquire permit to ensure only one command executes at a time
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::Bridge("command queue closed".to_string()))?;

        // Check if we need to wait before executing
        let mut last_cmd = self.last_command.lock().await;
        let elapsed = last_cmd.elapsed();
        if elapsed < self.min_delay {
            let wait_time = self.min_delay - elapsed;
            trace!("Rate limiting: waiting {:?} before next command", wait_time);
            time::sleep(wait_time).await;
        }

        let result = future.await;

        *last_cmd = std::time::Instant::now();

        result
    }
}

/// Pipes to the running bridge process
struct BridgeIo {
    /// Kept so the process is killed when the pipes are dropped
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    /// A request was written and its answer has not been read yet
    awaiting_answer: bool,
}

impl BridgeIo {
    /// Starts the bridge process and waits for its ready line
    async fn start(bridge: &BridgeConfig, ready_timeout: Duration) -> Result<Self> {
        info!("Starting fixture bridge");
        let mut child = Command::new(&bridge.command)
            .args(&bridge.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Bridge("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Bridge("bridge stdout unavailable".to_string()))?;
        let mut stdout = BufReader::new(stdout).lines();

        let greeting = time::timeout(ready_timeout, stdout.next_line())
            .await
            .map_err(|_| Error::Bridge("bridge did not become ready".to_string()))??;
        match greeting.as_deref().map(str::trim) {
            Some("OK") => debug!("Bridge ready"),
            Some(other) => {
                return Err(Error::Bridge(format!("unexpected greeting: {other}")));
            }
            None => return Err(Error::Bridge("bridge process exited".to_string())),
        }

        Ok(Self {
            _child: child,
            stdin,
            stdout,
            awaiting_answer: false,
        })
    }

    /// Sends one request line and reads one response line
    async fn exchange(&mut self, request: &str) -> Result<String> {
        self.awaiting_answer = true;
        self.stdin.write_all(request.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;

        match self.stdout.next_line().await? {
            Some(line) => {
                self.awaiting_answer = false;
                Ok(line.trim().to_string())
            }
            None => Err(Error::Bridge("bridge process exited".to_string())),
        }
    }
}

/// Controls the fixtures through a long-running bridge process.
///
/// The bridge owns the device protocol. It is spoken to line by line on its
/// standard input and output:
///
/// ```text
/// > power_on:<device id>,<address>,<local key>,<version>
/// < OK
/// > status:<device id>,<address>,<local key>,<version>
/// < ON
/// ```
///
/// The bridge prints `OK` once it is ready, answers `OK`, `ON` or `OFF`
/// to commands and `ERR <message>` when a device cannot be reached.
///
/// A bridge that exits, fails an exchange, misses the command timeout or is
/// left with an unread answer is discarded and started again on the next
/// attempt, so answers always belong to the request just sent.
pub struct BridgeController {
    io: Mutex<Option<BridgeIo>>,
    bridge: BridgeConfig,
    command_queue: CommandQueue,
    fixtures: HashMap<Fixture, FixtureConfig>,
    command_timeout: Duration,
}

impl BridgeController {
    /// Starts the bridge process and waits for its ready line
    #[instrument(skip_all, fields(command = %config.bridge.command))]
    pub async fn spawn(config: &Config) -> Result<Self> {
        let bridge: &BridgeConfig = &config.bridge;

        let mut fixtures = HashMap::new();
        for fixture in FIXTURES {
            let identity = config.fixture(fixture);
            if identity.device_id.trim().is_empty() || identity.local_key.trim().is_empty() {
                error!("Missing device id or local key for {}", fixture);
                return Err(Error::InvalidConfig(format!(
                    "device_id and local_key are required for {fixture}"
                )));
            }
            fixtures.insert(fixture, identity.clone());
        }

        let command_timeout = Duration::from_secs(bridge.command_timeout_secs);
        let io = BridgeIo::start(bridge, command_timeout).await?;

        for fixture in FIXTURES {
            info!("Device set up for {}", fixture);
        }

        Ok(Self {
            io: Mutex::new(Some(io)),
            bridge: bridge.clone(),
            command_queue: CommandQueue::new(bridge.command_delay_ms),
            fixtures,
            command_timeout,
        })
    }

    /// The running bridge, started again if it was discarded
    async fn running<'a>(&self, io: &'a mut Option<BridgeIo>) -> Result<&'a mut BridgeIo> {
        if io.as_ref().is_some_and(|io| io.awaiting_answer) {
            warn!("Discarding bridge with an unanswered command");
            *io = None;
        }
        if io.is_none() {
            *io = Some(BridgeIo::start(&self.bridge, self.command_timeout).await?);
        }
        io.as_mut()
            .ok_or_else(|| Error::Bridge("bridge not running".to_string()))
    }

    fn request(&self, verb: &str, fixture: Fixture) -> Result<String> {
        let identity = self
            .fixtures
            .get(&fixture)
            .ok_or_else(|| Error::UnknownFixture(fixture.to_string()))?;
        Ok(format!(
            "{verb}:{},{},{},{}",
            identity.device_id, identity.address, identity.local_key, identity.version
        ))
    }

    /// Sends a command with retries and returns the bridge's answer
    #[instrument(skip(self))]
    async fn send_command(&self, verb: &str, fixture: Fixture) -> Result<String> {
        let request = self.request(verb, fixture)?;

        self.command_queue
            .execute(async {
                let mut io = self.io.lock().await;
                let mut attempt = 0;

                while attempt < MAX_RETRIES {
                    trace!(
                        "Sending bridge command (attempt {}/{})",
                        attempt + 1,
                        MAX_RETRIES
                    );

                    let (failure, restart) = match self.running(&mut io).await {
                        Ok(bridge) => {
                            match time::timeout(self.command_timeout, bridge.exchange(&request))
                                .await
                            {
                                Ok(Ok(answer)) => match answer.strip_prefix("ERR") {
                                    Some(message) => {
                                        (Error::Bridge(message.trim().to_string()), false)
                                    }
                                    None => return Ok(answer),
                                },
                                Ok(Err(e)) => (e, true),
                                Err(_) => (Error::CommandTimeout(attempt + 1), true),
                            }
                        }
                        Err(e) => (e, true),
                    };
                    if restart {
                        *io = None;
                    }

                    attempt += 1;
                    warn!(
                        "Command failed (attempt {}/{}): {}",
                        attempt, MAX_RETRIES, failure
                    );

                    if attempt < MAX_RETRIES {
                        trace!("Waiting before retry...");
                        time::sleep(RETRY_DELAY).await;
                    } else {
                        error!("Command failed permanently: {}", failure);
                        return Err(failure);
                    }
                }

                error!("Command failed after {} attempts", MAX_RETRIES);
                Err(Error::CommandTimeout(MAX_RETRIES))
            })
            .await
    }

    async fn expect_ok(&self, verb: &str, fixture: Fixture) -> Result<()> {
        match self.send_command(verb, fixture).await?.as_str() {
            "OK" => Ok(()),
            other => Err(Error::Bridge(format!("unexpected answer to {verb}: {other}"))),
        }
    }
}

#[async_trait]
impl FixtureController for BridgeController {
    async fn turn_on(&self, fixture: Fixture) -> Result<()> {
        debug!("Turning {} on", fixture);
        self.expect_ok("power_on", fixture).await
    }

    async fn turn_off(&self, fixture: Fixture) -> Result<()> {
        debug!("Turning {} off", fixture);
        self.expect_ok("power_off", fixture).await
    }

    async fn status(&self, fixture: Fixture) -> Result<bool> {
        match self.send_command("status", fixture).await?.as_str() {
            "ON" => Ok(true),
            "OFF" => Ok(false),
            other => Err(Error::Bridge(format!("unexpected status for {fixture}: {other}"))),
        }
    }
}

/// Logs commands instead of sending them and remembers the last state
#[derive(Debug, Default)]
pub struct DryRunController {
    states: SyncMutex<HashMap<Fixture, bool>>,
}

impl DryRunController {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FixtureController for DryRunController {
    async fn turn_on(&self, fixture: Fixture) -> Result<()> {
        info!("[dry-run] {} on", fixture);
        self.states.lock().insert(fixture, true);
        Ok(())
    }

    async fn turn_off(&self, fixture: Fixture) -> Result<()> {
        info!("[dry-run] {} off", fixture);
        self.states.lock().insert(fixture, false);
        Ok(())
    }

    async fn status(&self, fixture: Fixture) -> Result<bool> {
        Ok(self.states.lock().get(&fixture).copied().unwrap_or(false))
    }
}
