//! Kite binary tick frame decoding
//!
//! A frame is `[u16 packet count]` followed by `[u16 length][packet]` pairs,
//! all big-endian. The packet length identifies the mode:
//!
//! | bytes | content                                   |
//! |-------|-------------------------------------------|
//! | 8     | LTP                                       |
//! | 28    | index quote                               |
//! | 32    | index full (adds exchange timestamp)      |
//! | 44    | quote                                     |
//! | 184   | full (timestamps, open interest, depth)   |
//!
//! Prices are integers in the segment's minor unit.

use super::{Depth, DepthLevel, Mode, Ohlc, Tick};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// LTP packet length
pub const LTP_PACKET_LEN: usize = 8;
/// Index quote packet length
pub const INDEX_QUOTE_PACKET_LEN: usize = 28;
/// Index full packet length
pub const INDEX_FULL_PACKET_LEN: usize = 32;
/// Quote packet length
pub const QUOTE_PACKET_LEN: usize = 44;
/// Full packet length
pub const FULL_PACKET_LEN: usize = 184;

const SEGMENT_CDS: u32 = 3;
const SEGMENT_BCD: u32 = 6;
const SEGMENT_INDICES: u32 = 9;

const DEPTH_OFFSET: usize = 64;
const DEPTH_LEVELS: usize = 5;
const DEPTH_ENTRY_LEN: usize = 12;

/// Decode every packet of a binary frame
///
/// Truncated frames yield the packets decoded before the truncation.
/// Packets of unknown length are skipped.
pub fn parse_frame(data: &[u8], received_at: DateTime<Utc>) -> Vec<Tick> {
    let Some(count) = read_u16(data, 0) else {
        return Vec::new();
    };

    let mut ticks = Vec::with_capacity(usize::from(count));
    let mut offset = 2;

    for _ in 0..count {
        let Some(len) = read_u16(data, offset) else {
            warn!("Truncated frame: missing packet length at byte {}", offset);
            break;
        };
        let len = usize::from(len);
        offset += 2;

        let Some(packet) = data.get(offset..offset + len) else {
            warn!("Truncated frame: packet of {} bytes at byte {}", len, offset);
            break;
        };

        match parse_packet(packet, received_at) {
            Some(tick) => ticks.push(tick),
            None => debug!("Skipping packet of unknown length {}", len),
        }
        offset += len;
    }

    ticks
}

/// Decode a single packet
pub fn parse_packet(packet: &[u8], received_at: DateTime<Utc>) -> Option<Tick> {
    let token = read_u32(packet, 0)?;
    let segment = token & 0xFF;
    let divisor = price_divisor(segment);
    let price = |at: usize| read_u32(packet, at).map_or(0.0, |v| f64::from(v) / divisor);
    let quantity = |at: usize| read_u32(packet, at).unwrap_or(0);

    let mut tick = Tick {
        instrument_token: token,
        mode: Mode::Ltp,
        tradable: segment != SEGMENT_INDICES,
        last_price: price(4),
        last_traded_quantity: 0,
        average_price: 0.0,
        volume: 0,
        total_buy_quantity: 0,
        total_sell_quantity: 0,
        ohlc: None,
        last_trade_time: None,
        exchange_timestamp: None,
        depth: None,
        received_at,
    };

    match packet.len() {
        LTP_PACKET_LEN => {}
        INDEX_QUOTE_PACKET_LEN | INDEX_FULL_PACKET_LEN => {
            tick.mode = if packet.len() == INDEX_FULL_PACKET_LEN {
                Mode::Full
            } else {
                Mode::Quote
            };
            tick.ohlc = Some(Ohlc {
                high: price(8),
                low: price(12),
                open: price(16),
                close: price(20),
            });
            if packet.len() == INDEX_FULL_PACKET_LEN {
                tick.exchange_timestamp = read_timestamp(packet, 28);
            }
        }
        QUOTE_PACKET_LEN | FULL_PACKET_LEN => {
            tick.mode = if packet.len() == FULL_PACKET_LEN {
                Mode::Full
            } else {
                Mode::Quote
            };
            tick.last_traded_quantity = quantity(8);
            tick.average_price = price(12);
            tick.volume = quantity(16);
            tick.total_buy_quantity = quantity(20);
            tick.total_sell_quantity = quantity(24);
            tick.ohlc = Some(Ohlc {
                open: price(28),
                high: price(32),
                low: price(36),
                close: price(40),
            });

            if packet.len() == FULL_PACKET_LEN {
                tick.last_trade_time = read_timestamp(packet, 44);
                tick.exchange_timestamp = read_timestamp(packet, 60);
                tick.depth = Some(parse_depth(packet, divisor));
            }
        }
        _ => return None,
    }

    Some(tick)
}

fn parse_depth(packet: &[u8], divisor: f64) -> Depth {
    let level = |index: usize| {
        let at = DEPTH_OFFSET + index * DEPTH_ENTRY_LEN;
        DepthLevel {
            quantity: read_u32(packet, at).unwrap_or(0),
            price: read_u32(packet, at + 4).map_or(0.0, |v| f64::from(v) / divisor),
            orders: read_u16(packet, at + 8).unwrap_or(0),
        }
    };

    Depth {
        buy: (0..DEPTH_LEVELS).map(level).collect(),
        sell: (DEPTH_LEVELS..DEPTH_LEVELS * 2).map(level).collect(),
    }
}

const fn price_divisor(segment: u32) -> f64 {
    match segment {
        SEGMENT_CDS => 10_000_000.0,
        SEGMENT_BCD => 10_000.0,
        _ => 100.0,
    }
}

fn read_timestamp(packet: &[u8], at: usize) -> Option<DateTime<Utc>> {
    match read_u32(packet, at)? {
        0 => None,
        secs => DateTime::from_timestamp(i64::from(secs), 0),
    }
}

fn read_u16(data: &[u8], at: usize) -> Option<u16> {
    let bytes = data.get(at..at + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
