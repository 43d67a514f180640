//! Routes inbound frames through the codec table into the entity store.
//!
//! Frames are handled in two phases. Decoding is pure: it reads the frame, the
//! read-only unit schemas and, for the schema hint, the store as it stood at
//! the start of the tick. Merging then applies every successful decode to the
//! store in arrival order. A frame that fails to decode is logged and dropped;
//! it never touches the store and never stops the tick.

use crate::entity_store::EntityStateStore;
use log::{debug, warn};
use shared::codec::tank_state;
use shared::envelope::strip_length_prefix;
use shared::hexdump::hex_dump;
use shared::{
    CodecError, DecodeContext, Packet, PacketCodec, TankState, TankStatePacket,
    UnitSchemaRegistry,
};
use std::net::SocketAddr;
use std::sync::Arc;

/// What the transport layer knows about a frame's sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderContext {
    pub addr: SocketAddr,
    /// Net id previously reported over this connection, if any
    pub net_id: Option<u32>,
}

impl SenderContext {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, net_id: None }
    }

    pub fn with_net_id(addr: SocketAddr, net_id: u32) -> Self {
        Self {
            addr,
            net_id: Some(net_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub bytes: Vec<u8>,
    pub sender: SenderContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied { net_id: u32, replayed: bool },
    KeepAlive,
}

/// Running totals since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub frames: u64,
    pub applied: u64,
    pub replayed: u64,
    pub dropped: u64,
    pub keep_alives: u64,
}

/// Result of one tick's worth of frames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub applied: usize,
    pub replayed: usize,
    pub dropped: usize,
    pub keep_alives: usize,
    /// Entities updated this tick and the address that reported them,
    /// in arrival order
    pub sightings: Vec<(SocketAddr, u32)>,
}

struct Decoded {
    packet: Packet,
    replayed: bool,
}

pub struct Dispatcher {
    codec: PacketCodec,
    schemas: Arc<UnitSchemaRegistry>,
    store: EntityStateStore,
    stats: DispatchStats,
    debug_packets: bool,
}

impl Dispatcher {
    pub fn new(schemas: Arc<UnitSchemaRegistry>) -> Self {
        Self::with_codec(PacketCodec::new(), schemas)
    }

    pub fn with_codec(codec: PacketCodec, schemas: Arc<UnitSchemaRegistry>) -> Self {
        Self {
            codec,
            schemas,
            store: EntityStateStore::new(),
            stats: DispatchStats::default(),
            debug_packets: false,
        }
    }

    /// Logs a hex dump of every inbound frame at debug level.
    pub fn set_debug_packets(&mut self, enabled: bool) {
        self.debug_packets = enabled;
    }

    pub fn store(&self) -> &EntityStateStore {
        &self.store
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Unit type last known for the entity this frame is about, taken from
    /// the connection's association or, failing that, from the frame's tail.
    fn unit_type_hint(&self, frame: &[u8], sender: &SenderContext) -> Option<u32> {
        sender
            .net_id
            .or_else(|| tank_state::peek_net_id(frame))
            .and_then(|net_id| self.store.unit_type_hint(net_id))
    }

    fn decode(&self, datagram: &[u8], sender: &SenderContext) -> Result<Decoded, CodecError> {
        let frame = strip_length_prefix(datagram);

        if self.debug_packets {
            debug!(
                "Frame from {} ({} bytes):\n{}",
                sender.addr,
                frame.len(),
                hex_dump(frame)
            );
        }

        let hint = self.unit_type_hint(frame, sender);
        let first = self.codec.decode(frame, &DecodeContext::hinted(&self.schemas, hint));

        let err = match first {
            Ok(packet) => {
                return Ok(Decoded {
                    packet,
                    replayed: false,
                })
            }
            Err(err) => err,
        };

        // A stale hint can also surface as a length or registry failure when
        // the entity changed to a unit type with narrower vitals.
        let stale_hint = hint.is_some()
            && matches!(
                err,
                CodecError::TruncatedStream { .. }
                    | CodecError::TrailingBytes { .. }
                    | CodecError::UnknownUnitType(_)
            );
        if !err.needs_replay() && !stale_hint {
            return Err(err);
        }

        debug!("Replaying frame from {} after {}", sender.addr, err);
        match self.codec.decode(frame, &DecodeContext::replay(&self.schemas)) {
            Ok(packet) => Ok(Decoded {
                packet,
                replayed: true,
            }),
            Err(replay_err) if stale_hint => {
                debug!("Replay failed too: {}", replay_err);
                Err(err)
            }
            Err(replay_err) => Err(replay_err),
        }
    }

    fn apply(&mut self, decoded: Decoded) -> DispatchOutcome {
        match decoded.packet {
            Packet::TankState(TankStatePacket { timestamp, state }) => {
                let net_id = state.net_id;
                debug!("Tank {} update at sender tick {}", net_id, timestamp);
                self.store.apply_update(state);

                self.stats.applied += 1;
                if decoded.replayed {
                    self.stats.replayed += 1;
                }
                DispatchOutcome::Applied {
                    net_id,
                    replayed: decoded.replayed,
                }
            }
            Packet::KeepAlive => {
                self.stats.keep_alives += 1;
                DispatchOutcome::KeepAlive
            }
        }
    }

    fn record_drop(&mut self, sender: &SenderContext, err: &CodecError) {
        self.stats.dropped += 1;
        warn!("Dropped frame from {}: {}", sender.addr, err);
    }

    /// Decodes one frame and, on success, merges it into the store.
    pub fn handle_inbound(
        &mut self,
        datagram: &[u8],
        sender: &SenderContext,
    ) -> Result<DispatchOutcome, CodecError> {
        self.stats.frames += 1;

        match self.decode(datagram, sender) {
            Ok(decoded) => Ok(self.apply(decoded)),
            Err(err) => {
                self.record_drop(sender, &err);
                Err(err)
            }
        }
    }

    /// Handles all frames collected during one tick: every frame is decoded
    /// first, then the successful ones are merged in arrival order.
    pub fn process_tick(&mut self, frames: Vec<InboundFrame>) -> TickReport {
        let decoded: Vec<(SenderContext, Result<Decoded, CodecError>)> = frames
            .iter()
            .map(|frame| (frame.sender, self.decode(&frame.bytes, &frame.sender)))
            .collect();

        let mut report = TickReport::default();
        for (sender, result) in decoded {
            self.stats.frames += 1;

            match result {
                Ok(decoded) => match self.apply(decoded) {
                    DispatchOutcome::Applied { net_id, replayed } => {
                        report.applied += 1;
                        if replayed {
                            report.replayed += 1;
                        }
                        report.sightings.push((sender.addr, net_id));
                    }
                    DispatchOutcome::KeepAlive => report.keep_alives += 1,
                },
                Err(err) => {
                    report.dropped += 1;
                    self.record_drop(&sender, &err);
                }
            }
        }

        report
    }

    /// Removes an entity on the external "entity left" signal.
    pub fn entity_left(&mut self, net_id: u32) -> Option<TankState> {
        self.store.remove(net_id)
    }

    /// Encodes the current state of the given entities as outbound Tank State
    /// frames. Entities that are unknown or fail to encode are skipped.
    pub fn encode_entities(&self, net_ids: &[u32], timestamp: u32) -> Vec<(u32, Vec<u8>)> {
        net_ids
            .iter()
            .filter_map(|&net_id| {
                let state = self.store.get(net_id).ok()?.clone();
                let packet = Packet::TankState(TankStatePacket { timestamp, state });
                match self.codec.encode(&packet, &self.schemas) {
                    Ok(bytes) => Some((net_id, bytes)),
                    Err(err) => {
                        warn!("Failed to encode tank {}: {}", net_id, err);
                        None
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::codec::tank_state::encode_tank_state;
    use shared::{UnitConfig, Vec3, Vitals};

    fn addr() -> SocketAddr {
        "127.0.0.1:2627".parse().unwrap()
    }

    fn schemas() -> Arc<UnitSchemaRegistry> {
        Arc::new(
            UnitSchemaRegistry::from_configs([
                UnitConfig::new(0, false, false),
                UnitConfig::new(3, true, true),
                UnitConfig::new(7, true, false),
            ])
            .unwrap(),
        )
    }

    fn frame(net_id: u32, unit_type: u32, vitals: Option<Vitals>) -> Vec<u8> {
        let packet = TankStatePacket {
            timestamp: 1,
            state: TankState {
                net_id,
                unit_type,
                flags: 0,
                position: Vec3::new(1.0, 2.0, 3.0),
                velocity: Vec3::ZERO,
                vitals,
            },
        };
        // Encode against a registry that knows every unit type used in tests
        let all = UnitSchemaRegistry::from_configs([
            UnitConfig::new(0, false, false),
            UnitConfig::new(3, true, true),
            UnitConfig::new(7, true, false),
            UnitConfig::new(9, false, false),
        ])
        .unwrap();
        encode_tank_state(&packet, &all).unwrap()
    }

    fn vitals(unit_type: u32) -> Vitals {
        let (firing_mask, extras) = match unit_type {
            3 => (Some(4096), Some(1)),
            7 => (Some(4096), None),
            _ => (None, None),
        };
        Vitals {
            weapon_id: 3,
            health_mult: 500,
            energy_mult: 800,
            firing_mask,
            extra_a: extras,
            extra_b: extras,
        }
    }

    #[test]
    fn test_first_sight_replays() {
        let mut dispatcher = Dispatcher::new(schemas());
        let sender = SenderContext::new(addr());

        let outcome = dispatcher
            .handle_inbound(&frame(42, 7, Some(vitals(7))), &sender)
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Applied {
                net_id: 42,
                replayed: true
            }
        );

        // Now the store knows entity 42, so the hint resolves directly
        let outcome = dispatcher
            .handle_inbound(&frame(42, 7, Some(vitals(7))), &sender)
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Applied {
                net_id: 42,
                replayed: false
            }
        );
        assert_eq!(dispatcher.stats().replayed, 1);
        assert_eq!(dispatcher.stats().applied, 2);
    }

    #[test]
    fn test_unknown_unit_type_leaves_store_unchanged() {
        let mut dispatcher = Dispatcher::new(schemas());
        let sender = SenderContext::new(addr());

        let result = dispatcher.handle_inbound(&frame(42, 9, Some(vitals(9))), &sender);
        assert_eq!(result, Err(CodecError::UnknownUnitType(9)));
        assert!(dispatcher.store().is_empty());
        assert_eq!(dispatcher.stats().dropped, 1);
    }

    #[test]
    fn test_cut_first_sight_frame_is_truncated() {
        let mut dispatcher = Dispatcher::new(schemas());
        let sender = SenderContext::new(addr());
        let full = frame(42, 7, Some(vitals(7)));

        for cut in 1..=3 {
            let result = dispatcher.handle_inbound(&full[..full.len() - cut], &sender);
            assert!(
                matches!(result, Err(CodecError::TruncatedStream { .. })),
                "cut {} gave {:?}",
                cut,
                result
            );
        }
        assert!(dispatcher.store().is_empty());
        assert_eq!(dispatcher.stats().dropped, 3);
    }

    #[test]
    fn test_unit_type_change_is_resolved_by_replay() {
        let mut dispatcher = Dispatcher::new(schemas());
        let sender = SenderContext::with_net_id(addr(), 5);

        dispatcher
            .handle_inbound(&frame(5, 3, Some(vitals(3))), &sender)
            .unwrap();

        // Narrower schema than the hinted unit 3
        let outcome = dispatcher
            .handle_inbound(&frame(5, 0, Some(vitals(0))), &sender)
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Applied {
                net_id: 5,
                replayed: true
            }
        );
        let tank = dispatcher.store().get(5).unwrap();
        assert_eq!(tank.unit_type, 0);
        // Fields the new schema does not carry keep their earlier values
        assert_eq!(tank.vitals.unwrap().firing_mask, Some(4096));

        // And back to the wider one
        let outcome = dispatcher
            .handle_inbound(&frame(5, 3, Some(vitals(3))), &sender)
            .unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Applied { replayed: true, .. }
        ));
    }

    #[test]
    fn test_unknown_opcode_and_empty_frame() {
        let mut dispatcher = Dispatcher::new(schemas());
        let sender = SenderContext::new(addr());

        assert_eq!(
            dispatcher.handle_inbound(&[0x99, 0x00], &sender),
            Err(CodecError::UnknownOpcode(0x99))
        );
        assert_eq!(
            dispatcher.handle_inbound(&[], &sender),
            Err(CodecError::EmptyFrame)
        );
        assert_eq!(dispatcher.stats().dropped, 2);
        assert_eq!(dispatcher.stats().frames, 2);
    }

    #[test]
    fn test_keep_alive_and_length_prefix() {
        let mut dispatcher = Dispatcher::new(schemas());
        let sender = SenderContext::new(addr());

        assert_eq!(
            dispatcher.handle_inbound(&[0x40], &sender),
            Ok(DispatchOutcome::KeepAlive)
        );

        let prefixed = shared::envelope::with_length_prefix(&frame(8, 0, None)).unwrap();
        assert!(dispatcher.handle_inbound(&prefixed, &sender).is_ok());
        assert!(dispatcher.store().contains(8));
    }

    #[test]
    fn test_process_tick_orders_and_isolates_failures() {
        let mut dispatcher = Dispatcher::new(schemas());
        let sender = SenderContext::new(addr());

        let first = frame(1, 0, Some(vitals(0)));
        let second = {
            let mut v = vitals(0);
            v.health_mult = 1;
            frame(1, 0, Some(v))
        };
        let broken = first[..10].to_vec();

        let frames = vec![
            InboundFrame {
                bytes: first,
                sender,
            },
            InboundFrame {
                bytes: broken,
                sender,
            },
            InboundFrame {
                bytes: vec![0x40],
                sender,
            },
            InboundFrame {
                bytes: second,
                sender,
            },
        ];

        let report = dispatcher.process_tick(frames);
        assert_eq!(report.applied, 2);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.keep_alives, 1);
        assert_eq!(report.sightings, vec![(addr(), 1), (addr(), 1)]);

        // Last writer wins within the tick
        let tank = dispatcher.store().get(1).unwrap();
        assert_eq!(tank.vitals.unwrap().health_mult, 1);
    }

    #[test]
    fn test_entity_left_and_encode() {
        let mut dispatcher = Dispatcher::new(schemas());
        let sender = SenderContext::new(addr());
        let original = frame(42, 7, Some(vitals(7)));
        dispatcher.handle_inbound(&original, &sender).unwrap();

        let encoded = dispatcher.encode_entities(&[42, 99], 1);
        assert_eq!(encoded.len(), 1);
        assert_eq!(encoded[0].0, 42);
        assert_eq!(encoded[0].1, original);

        assert!(dispatcher.entity_left(42).is_some());
        assert!(dispatcher.encode_entities(&[42], 1).is_empty());
    }
}
