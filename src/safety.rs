//! Connectivity and movement safety
//!
//! Decides whether the dialogue engine can be reached, whether a movement is
//! allowed right now, and what to say when the network is gone.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::SafetyConfig;
use crate::movement::MovementCommand;

/// Upper bound for one reachability probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Movement patterns allowed while an obstacle is present
const OBSTACLE_SAFE_PATTERNS: &[&str] = &["stop", "backward", "slow_gentle", "default"];

const GREETING_KEYWORDS: &[&str] = &["你好", "您好", "嗨", "hello", "hi"];
const GOODBYE_KEYWORDS: &[&str] = &["再见", "拜拜", "goodbye", "bye"];

const GREETING_REPLIES: &[&str] = &[
    "你好！我现在处于离线模式，功能有限。",
    "嗨！网络连接有问题，我只能进行基本操作。",
    "你好！我暂时无法连接网络，请稍后再试。",
];

const NETWORK_ERROR_REPLIES: &[&str] = &[
    "抱歉，网络连接出现问题，我无法访问AI服务。",
    "网络不稳定，我现在只能执行基本命令。",
    "连接中断了，让我们等网络恢复吧。",
];

const GOODBYE_REPLY: &str = "再见！希望网络快点恢复~";

/// Safety and degradation collaborator
#[async_trait]
pub trait SafetyMonitor: Send + Sync {
    /// Whether network-dependent dialogue should be attempted
    async fn is_network_available(&self) -> bool;

    /// Whether `command` may be executed now
    fn is_movement_safe(&self, command: &MovementCommand) -> bool;

    /// Canned reply used when the dialogue engine cannot answer
    fn offline_response(&self, text: &str) -> String;

    /// Record that a network-dependent call just failed
    fn report_network_failure(&self) {}
}

/// Probe-based safety monitor with canned offline replies
pub struct DefaultSafety {
    probe_addr: String,
    cache_ttl: Duration,
    cached: Mutex<Option<(Instant, bool)>>,
    emergency_stop: AtomicBool,
    movement_restricted: AtomicBool,
    obstacle_detected: AtomicBool,
    rotation: AtomicUsize,
}

impl DefaultSafety {
    #[must_use]
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            probe_addr: config.probe_addr.clone(),
            cache_ttl: Duration::from_secs(config.probe_cache_s),
            cached: Mutex::new(None),
            emergency_stop: AtomicBool::new(false),
            movement_restricted: AtomicBool::new(false),
            obstacle_detected: AtomicBool::new(false),
            rotation: AtomicUsize::new(0),
        }
    }

    /// Block every movement except stop
    pub fn set_emergency_stop(&self, active: bool) {
        tracing::warn!(active, "emergency stop changed");
        self.emergency_stop.store(active, Ordering::SeqCst);
    }

    /// Restrict movement to stop only (e.g. low battery)
    pub fn set_movement_restricted(&self, restricted: bool) {
        tracing::info!(restricted, "movement restriction changed");
        self.movement_restricted.store(restricted, Ordering::SeqCst);
    }

    /// Allow only retreating patterns while an obstacle is present
    pub fn set_obstacle_detected(&self, detected: bool) {
        tracing::info!(detected, "obstacle status changed");
        self.obstacle_detected.store(detected, Ordering::SeqCst);
    }

    fn cached_status(&self) -> Option<bool> {
        let cached = *self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        cached
            .filter(|(at, _)| at.elapsed() < self.cache_ttl)
            .map(|(_, online)| online)
    }

    fn store_status(&self, online: bool) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some((Instant::now(), online));
    }

    fn next_from(&self, pool: &[&str]) -> String {
        let index = self.rotation.fetch_add(1, Ordering::Relaxed) % pool.len();
        pool[index].to_string()
    }
}

#[async_trait]
impl SafetyMonitor for DefaultSafety {
    async fn is_network_available(&self) -> bool {
        if let Some(online) = self.cached_status() {
            return online;
        }

        let online = matches!(
            tokio::time::timeout(PROBE_TIMEOUT, tokio::net::TcpStream::connect(&self.probe_addr))
                .await,
            Ok(Ok(_))
        );
        if !online {
            tracing::warn!(addr = %self.probe_addr, "network probe failed");
        }
        self.store_status(online);
        online
    }

    fn is_movement_safe(&self, command: &MovementCommand) -> bool {
        if self.emergency_stop.load(Ordering::SeqCst) {
            tracing::warn!(pattern = %command.pattern, "emergency stop active, movement refused");
            return command.is_stop();
        }

        if self.movement_restricted.load(Ordering::SeqCst) && !command.is_stop() {
            tracing::warn!(pattern = %command.pattern, "movement restricted, refused");
            return false;
        }

        if self.obstacle_detected.load(Ordering::SeqCst)
            && !OBSTACLE_SAFE_PATTERNS.contains(&command.pattern.as_str())
        {
            tracing::warn!(pattern = %command.pattern, "obstacle detected, movement refused");
            return false;
        }

        true
    }

    fn offline_response(&self, text: &str) -> String {
        let text = text.trim().to_lowercase();

        if GOODBYE_KEYWORDS.iter().any(|k| text.contains(k)) {
            GOODBYE_REPLY.to_string()
        } else if GREETING_KEYWORDS.iter().any(|k| text.contains(k)) {
            self.next_from(GREETING_REPLIES)
        } else {
            self.next_from(NETWORK_ERROR_REPLIES)
        }
    }

    fn report_network_failure(&self) {
        self.store_status(false);
    }
}
