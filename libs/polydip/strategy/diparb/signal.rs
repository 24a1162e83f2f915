//! Leg-1 signal detection over a sliding price window.
//!
//! Detection is pure and synchronous: it runs on the bus delivery task for
//! every orderbook update and must never suspend.

use crate::config::DipArbConfig;
use crate::domain::OutcomeSide;
use std::collections::VecDeque;
use tracing::trace;

/// Maximum samples kept in the sliding window
pub const PRICE_WINDOW_CAPACITY: usize = 100;

/// Sensitivity of the mispricing estimate: a 0.5% move of the underlying
/// against the open maps to a 50-point probability swing
const MISPRICING_SENSITIVITY: f64 = 100.0;

/// One observation of both asks
#[derive(Debug, Clone, Copy)]
pub struct PriceSample {
    pub t_ms: i64,
    pub up_ask: f64,
    pub down_ask: f64,
}

/// Bounded ring of ask samples, cleared at round start so only in-round
/// moves are detectable.
#[derive(Debug, Default)]
pub struct PriceWindow {
    samples: VecDeque<PriceSample>,
}

impl PriceWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: PriceSample) {
        if self.samples.len() == PRICE_WINDOW_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Newest sample at or before `cutoff_ms`: the reference price
    /// "one window ago".
    pub fn sample_at_or_before(&self, cutoff_ms: i64) -> Option<PriceSample> {
        self.samples
            .iter()
            .rev()
            .find(|s| s.t_ms <= cutoff_ms)
            .copied()
    }
}

/// What produced a leg-1 candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// The bought side's ask dropped by the threshold within the window
    Dip,
    /// The opposite side's ask rose by the surge threshold
    Surge,
    /// The quoted ask is below the probability implied by the underlying
    Mispricing,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Dip => write!(f, "dip"),
            SignalKind::Surge => write!(f, "surge"),
            SignalKind::Mispricing => write!(f, "mispricing"),
        }
    }
}

/// A leg-1 buy candidate
#[derive(Debug, Clone)]
pub struct Leg1Signal {
    /// Side to BUY
    pub side: OutcomeSide,
    pub kind: SignalKind,
    /// Comparison baseline: the window-ago ask (dip/surge) or the implied
    /// probability (mispricing)
    pub reference: f64,
    /// Current ask of the buy side
    pub current: f64,
    /// Relative move or edge that triggered the signal
    pub magnitude: f64,
}

/// Evaluate the three detectors in priority order: instant dip, instant
/// surge (when configured), then the mispricing fallback.
pub fn detect_leg1(
    window: &PriceWindow,
    now_ms: i64,
    up_ask: f64,
    down_ask: f64,
    price_to_beat: f64,
    live_underlying: Option<f64>,
    cfg: &DipArbConfig,
) -> Option<Leg1Signal> {
    let ago = window.sample_at_or_before(now_ms - cfg.sliding_window_ms);

    if let Some(ago) = ago {
        let sides = [
            (OutcomeSide::Up, ago.up_ask, up_ask),
            (OutcomeSide::Down, ago.down_ask, down_ask),
        ];

        // Instant dip: buy the side that dropped
        for (side, ago_price, now_price) in sides {
            if ago_price > 0.0 && now_price > 0.0 {
                let drop = (ago_price - now_price) / ago_price;
                if drop >= cfg.dip_threshold {
                    trace!(%side, drop, "dip detected");
                    return Some(Leg1Signal {
                        side,
                        kind: SignalKind::Dip,
                        reference: ago_price,
                        current: now_price,
                        magnitude: drop,
                    });
                }
            }
        }

        // Instant surge: buy the untouched side
        if let Some(surge_threshold) = cfg.surge_threshold {
            for (side, ago_price, now_price) in sides {
                if ago_price > 0.0 && now_price > 0.0 {
                    let rise = (now_price - ago_price) / ago_price;
                    if rise >= surge_threshold {
                        let buy_side = side.opposite();
                        let current = match buy_side {
                            OutcomeSide::Up => up_ask,
                            OutcomeSide::Down => down_ask,
                        };
                        if current > 0.0 {
                            trace!(%buy_side, rise, "surge detected");
                            return Some(Leg1Signal {
                                side: buy_side,
                                kind: SignalKind::Surge,
                                reference: ago_price,
                                current,
                                magnitude: rise,
                            });
                        }
                    }
                }
            }
        }
    }

    // Mispricing fallback: compare the quoted asks to the up-win
    // probability implied by the underlying vs the round-open reference
    if price_to_beat > 0.0 {
        if let Some(live) = live_underlying {
            if live > 0.0 {
                let delta_pct = (live - price_to_beat) / price_to_beat;
                let prob_up = (0.5 + delta_pct * MISPRICING_SENSITIVITY).clamp(0.0, 1.0);

                if up_ask > 0.0 && prob_up - up_ask >= cfg.dip_threshold {
                    return Some(Leg1Signal {
                        side: OutcomeSide::Up,
                        kind: SignalKind::Mispricing,
                        reference: prob_up,
                        current: up_ask,
                        magnitude: prob_up - up_ask,
                    });
                }
                let prob_down = 1.0 - prob_up;
                if down_ask > 0.0 && prob_down - down_ask >= cfg.dip_threshold {
                    return Some(Leg1Signal {
                        side: OutcomeSide::Down,
                        kind: SignalKind::Mispricing,
                        reference: prob_down,
                        current: down_ask,
                        magnitude: prob_down - down_ask,
                    });
                }
            }
        }
    }

    None
}
