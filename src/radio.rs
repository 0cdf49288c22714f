//! Carrier-sense transmit policy and the radio drive loop.
//!
//! The router task only ever enqueues frames; this module owns the other
//! end of the transmit channel and the channel-access discipline: probe the
//! channel, back off while it is busy, optionally flip the p-persistent
//! coin, then hold the RX→TX guard time and fire.

use embassy_time::{Duration, Timer};
use log::{debug, warn};
use rand::Rng;
use serde::Deserialize;

use crate::types::TxFrameQueueReceiver;

/// How long to wait before re-probing a busy channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffScheme {
    /// Uniform wait between the legacy bounds.
    Legacy,
    /// Random wait up to a window that doubles per busy probe, capped.
    Binary,
    /// 802.15.4-style slotted wait over `2^exp` slots, exponent bumped per
    /// busy probe.
    SlottedExponent,
}

/// Channel-access tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CsmaConfig {
    pub scheme: BackoffScheme,
    pub legacy_min_ms: u64,
    pub legacy_max_ms: u64,
    pub binary_init_ms: u64,
    pub binary_max_ms: u64,
    pub slot_unit_ms: u64,
    pub max_exponent: u8,
    /// When set, transmit with probability `p-transmit` even on a free
    /// channel, deferring one slot otherwise.
    pub p_persistent: bool,
    pub p_transmit: f32,
    pub defer_slot_ms: u64,
    /// Settle time between the last clear probe and keying the radio.
    pub guard_time_ms: u64,
}

impl Default for CsmaConfig {
    fn default() -> Self {
        Self {
            scheme: BackoffScheme::Legacy,
            legacy_min_ms: 5,
            legacy_max_ms: 50,
            binary_init_ms: 50,
            binary_max_ms: 2000,
            slot_unit_ms: 20,
            max_exponent: 5,
            p_persistent: false,
            p_transmit: 0.6,
            defer_slot_ms: 20,
            guard_time_ms: 2,
        }
    }
}

/// Per-frame backoff state; create fresh for every dequeued frame.
pub struct Backoff<'a> {
    config: &'a CsmaConfig,
    binary_window_ms: u64,
    exponent: u8,
}

impl<'a> Backoff<'a> {
    pub fn new(config: &'a CsmaConfig) -> Self {
        Self {
            config,
            binary_window_ms: config.binary_init_ms,
            exponent: 2,
        }
    }

    /// Draw the next busy-channel wait and advance the scheme state.
    pub fn next_wait(&mut self, rng: &mut impl Rng) -> Duration {
        let ms = match self.config.scheme {
            BackoffScheme::Legacy => {
                rng.gen_range(self.config.legacy_min_ms..=self.config.legacy_max_ms)
            }
            BackoffScheme::Binary => {
                let wait = rng.gen_range(0..=self.binary_window_ms);
                self.binary_window_ms = (self.binary_window_ms * 2).min(self.config.binary_max_ms);
                wait
            }
            BackoffScheme::SlottedExponent => {
                let exp = self.exponent.min(self.config.max_exponent);
                let slot = rng.gen_range(0..(1u64 << exp));
                self.exponent = self.exponent.saturating_add(1);
                slot * self.config.slot_unit_ms
            }
        };
        Duration::from_millis(ms)
    }
}

/// The physical radio as seen by the drive loop. Receiving is the driver's
/// own business: it pushes frames into the rx channel from its IRQ path.
pub trait RadioDriver {
    /// Carrier-sense probe.
    fn is_channel_free(&mut self) -> bool;

    /// Key the radio with one frame. Returns false when the hardware
    /// rejected the transmission; the frame is dropped either way.
    fn transmit(&mut self, frame: &[u8]) -> bool;

    /// Most recent (RSSI dBm, SNR dB) reading, when the hardware has one.
    fn link_quality(&self) -> Option<(f32, f32)> {
        None
    }
}

/// Drain the transmit channel through the CSMA discipline forever.
///
/// Generic over the driver so node firmware, the loopback demo and tests
/// share one loop; wrap it in an executor task to spawn it.
pub async fn drive_transmits<R: RadioDriver>(
    mut driver: R,
    tx_frames: TxFrameQueueReceiver,
    config: CsmaConfig,
    mut rng: impl Rng,
) -> ! {
    loop {
        let frame = tx_frames.receive().await;
        let mut backoff = Backoff::new(&config);

        loop {
            if !driver.is_channel_free() {
                let wait = backoff.next_wait(&mut rng);
                debug!("channel busy, backing off {} ms", wait.as_millis());
                Timer::after(wait).await;
                continue;
            }

            if config.p_persistent && rng.r#gen::<f32>() > config.p_transmit {
                Timer::after(Duration::from_millis(config.defer_slot_ms)).await;
                continue;
            }

            Timer::after(Duration::from_millis(config.guard_time_ms)).await;
            if !driver.transmit(frame.as_slice()) {
                warn!("radio rejected frame of {} bytes, dropped", frame.len());
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn legacy_wait_stays_in_bounds() {
        let config = CsmaConfig::default();
        let mut backoff = Backoff::new(&config);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let wait = backoff.next_wait(&mut rng).as_millis();
            assert!((config.legacy_min_ms..=config.legacy_max_ms).contains(&wait));
        }
    }

    #[test]
    fn binary_window_doubles_then_caps() {
        let config = CsmaConfig {
            scheme: BackoffScheme::Binary,
            ..CsmaConfig::default()
        };
        let mut backoff = Backoff::new(&config);
        let mut rng = StdRng::seed_from_u64(7);

        let mut expected_window = config.binary_init_ms;
        for _ in 0..10 {
            let wait = backoff.next_wait(&mut rng).as_millis();
            assert!(wait <= expected_window);
            expected_window = (expected_window * 2).min(config.binary_max_ms);
        }
        assert_eq!(expected_window, config.binary_max_ms);
    }

    #[test]
    fn slotted_wait_bounded_by_max_exponent() {
        let config = CsmaConfig {
            scheme: BackoffScheme::SlottedExponent,
            ..CsmaConfig::default()
        };
        let mut backoff = Backoff::new(&config);
        let mut rng = StdRng::seed_from_u64(7);
        let bound = (1u64 << config.max_exponent) * config.slot_unit_ms;
        for _ in 0..32 {
            assert!(backoff.next_wait(&mut rng).as_millis() < bound);
        }
    }
}
