//! Core data types shared by the engine and the analysis layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV bar representing a single time period of market data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate that bar data is internally consistent.
    pub fn validate(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= 0.0
            && [self.open, self.high, self.low, self.close]
                .iter()
                .all(|v| v.is_finite())
    }
}

/// Direction of an open position or completed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn direction(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// What a signal asks the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    /// Open long, or flip an open short to long.
    Buy,
    /// Open short, or flip an open long to short.
    Sell,
    /// Exit whatever position is open.
    Close,
}

/// Trading instruction emitted by a bar-by-bar strategy.
///
/// `stop_loss` and `take_profit` are absolute price levels attached to the
/// position the signal opens. They are ignored on `Close`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    pub size: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl Signal {
    pub fn buy(size: f64) -> Self {
        Self {
            action: SignalAction::Buy,
            size,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn sell(size: f64) -> Self {
        Self {
            action: SignalAction::Sell,
            size,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn close() -> Self {
        Self {
            action: SignalAction::Close,
            size: 0.0,
            stop_loss: None,
            take_profit: None,
        }
    }

    /// Attach a protective stop level.
    pub fn with_stop_loss(mut self, price: f64) -> Self {
        self.stop_loss = Some(price);
        self
    }

    /// Attach a profit target level.
    pub fn with_take_profit(mut self, price: f64) -> Self {
        self.take_profit = Some(price);
        self
    }

    /// Side this signal would open, if any.
    pub fn side(&self) -> Option<Side> {
        match self.action {
            SignalAction::Buy => Some(Side::Long),
            SignalAction::Sell => Some(Side::Short),
            SignalAction::Close => None,
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
    EndOfData,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitReason::Signal => "signal",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::EndOfData => "end_of_data",
        };
        write!(f, "{}", label)
    }
}

/// A completed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    /// Net profit in account currency, after commission.
    pub pnl: f64,
    /// Gross price move in the trade's favour, in points.
    pub pnl_points: f64,
    /// Commission paid on entry and exit combined.
    pub commission: f64,
    pub exit_reason: ExitReason,
}

impl Trade {
    /// Build a trade from its fills.
    ///
    /// `pnl = (exit - entry) * size * point_value * direction - commission`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_fills(
        side: Side,
        size: f64,
        entry_price: f64,
        exit_price: f64,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
        point_value: f64,
        commission: f64,
        exit_reason: ExitReason,
    ) -> Self {
        let pnl_points = (exit_price - entry_price) * side.direction();
        let pnl = pnl_points * size * point_value - commission;
        Self {
            side,
            size,
            entry_price,
            exit_price,
            entry_time,
            exit_time,
            pnl,
            pnl_points,
            commission,
            exit_reason,
        }
    }

    /// Trade with only a PnL; used where timing is irrelevant.
    pub fn with_pnl(pnl: f64, time: DateTime<Utc>) -> Self {
        Self {
            side: Side::Long,
            size: 1.0,
            entry_price: 0.0,
            exit_price: 0.0,
            entry_time: time,
            exit_time: time,
            pnl,
            pnl_points: 0.0,
            commission: 0.0,
            exit_reason: ExitReason::Signal,
        }
    }

    /// Check if the trade made money (strictly positive net PnL).
    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }

    /// Holding period.
    pub fn holding_period(&self) -> chrono::Duration {
        self.exit_time - self.entry_time
    }
}

/// A point on the mark-to-market equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Contract specification for the single traded instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub symbol: String,
    /// Minimum price increment.
    pub tick_size: f64,
    /// Currency value of a one-point move for one unit.
    pub point_value: f64,
}

impl InstrumentSpec {
    pub fn new(symbol: impl Into<String>, tick_size: f64, point_value: f64) -> Self {
        Self {
            symbol: symbol.into(),
            tick_size,
            point_value,
        }
    }

    /// Value of one tick for one unit.
    pub fn tick_value(&self) -> f64 {
        self.tick_size * self.point_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_bar_validation() {
        let valid = Bar::new(t(1), 100.0, 105.0, 95.0, 102.0, 1000.0);
        assert!(valid.validate());

        let invalid = Bar::new(t(1), 100.0, 95.0, 105.0, 102.0, 1000.0);
        assert!(!invalid.validate());

        let nan = Bar::new(t(1), f64::NAN, 105.0, 95.0, 102.0, 1000.0);
        assert!(!nan.validate());
    }

    #[test]
    fn test_long_trade_pnl() {
        let trade = Trade::from_fills(
            Side::Long,
            2.0,
            100.0,
            110.0,
            t(1),
            t(5),
            50.0,
            4.0,
            ExitReason::Signal,
        );
        assert!((trade.pnl_points - 10.0).abs() < 1e-10);
        assert!((trade.pnl - (10.0 * 2.0 * 50.0 - 4.0)).abs() < 1e-10);
        assert!(trade.is_winner());
        assert_eq!(trade.holding_period(), chrono::Duration::days(4));
    }

    #[test]
    fn test_short_trade_pnl() {
        let trade = Trade::from_fills(
            Side::Short,
            1.0,
            100.0,
            110.0,
            t(1),
            t(2),
            1.0,
            0.0,
            ExitReason::StopLoss,
        );
        assert!((trade.pnl + 10.0).abs() < 1e-10);
        assert!(!trade.is_winner());
    }

    #[test]
    fn test_zero_pnl_is_not_a_winner() {
        let trade = Trade::with_pnl(0.0, t(1));
        assert!(!trade.is_winner());
    }

    #[test]
    fn test_signal_builders() {
        let signal = Signal::buy(1.0).with_stop_loss(95.0).with_take_profit(110.0);
        assert_eq!(signal.side(), Some(Side::Long));
        assert_eq!(signal.stop_loss, Some(95.0));
        assert_eq!(signal.take_profit, Some(110.0));
        assert_eq!(Signal::close().side(), None);
        assert_eq!(Side::Short.opposite(), Side::Long);
    }

    #[test]
    fn test_instrument_tick_value() {
        let es = InstrumentSpec::new("ES", 0.25, 50.0);
        assert!((es.tick_value() - 12.5).abs() < 1e-10);
    }
}
