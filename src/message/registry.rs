//! Opcode registry.
//!
//! Maps a leading opcode byte to a constructor for the concrete message type.
//! The same opcode may carry different shapes depending on direction, so the
//! registry has three tiers looked up in order: direction-agnostic, then the
//! tier selected by the caller's `from_server` flag.
//!
//! Registries are explicit values. Build one at startup, then share it behind
//! an `Arc`; duplicate registration panics in [`Registry::register`] so
//! conflicting message tables fail fast.

use std::collections::HashMap;

use super::Message;
use crate::core::{CodecError, Direction, RegistryError};

/// Constructor producing an empty value to decode into.
pub type Constructor = fn() -> Box<dyn Message>;

#[derive(Clone, Copy)]
struct Entry {
    name: &'static str,
    ctor: Constructor,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

fn construct<T: Message + Default>() -> Box<dyn Message> {
    Box::new(T::default())
}

/// Opcode to message-type table.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    any: HashMap<u8, Entry>,
    from_server: HashMap<u8, Entry>,
    from_client: HashMap<u8, Entry>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn tier_mut(&mut self, direction: Direction) -> &mut HashMap<u8, Entry> {
        match direction {
            Direction::Any => &mut self.any,
            Direction::FromServer => &mut self.from_server,
            Direction::FromClient => &mut self.from_client,
        }
    }

    fn tier(&self, direction: Direction) -> &HashMap<u8, Entry> {
        match direction {
            Direction::Any => &self.any,
            Direction::FromServer => &self.from_server,
            Direction::FromClient => &self.from_client,
        }
    }

    /// Register `T` under its opcode, failing on a duplicate in the same tier.
    pub fn try_register<T: Message + Default>(
        &mut self,
        direction: Direction,
    ) -> Result<(), RegistryError> {
        let opcode = T::default().opcode();
        let tier = self.tier_mut(direction);
        if tier.contains_key(&opcode) {
            return Err(RegistryError::Duplicate {
                opcode,
                tier: direction,
            });
        }
        tier.insert(
            opcode,
            Entry {
                name: std::any::type_name::<T>(),
                ctor: construct::<T>,
            },
        );
        Ok(())
    }

    /// Register `T` under its opcode.
    ///
    /// # Panics
    ///
    /// Panics if the opcode is already registered in the same tier.
    pub fn register<T: Message + Default>(&mut self, direction: Direction) -> &mut Self {
        if let Err(e) = self.try_register::<T>(direction) {
            panic!("message registry: {e} ({})", std::any::type_name::<T>());
        }
        self
    }

    /// Whether `opcode` is registered in the given tier.
    pub fn contains(&self, opcode: u8, direction: Direction) -> bool {
        self.tier(direction).contains_key(&opcode)
    }

    /// Number of registrations across all tiers.
    pub fn len(&self) -> usize {
        self.any.len() + self.from_server.len() + self.from_client.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve the constructor for `opcode`.
    pub fn lookup(&self, opcode: u8, from_server: bool) -> Option<Constructor> {
        let directed = if from_server {
            &self.from_server
        } else {
            &self.from_client
        };
        self.any
            .get(&opcode)
            .or_else(|| directed.get(&opcode))
            .map(|entry| entry.ctor)
    }

    /// Decode one message from the start of `buf`.
    ///
    /// Returns the message and the number of bytes consumed.
    pub fn decode(
        &self,
        buf: &[u8],
        from_server: bool,
    ) -> Result<(Box<dyn Message>, usize), RegistryError> {
        let Some(&opcode) = buf.first() else {
            return Err(RegistryError::Decode {
                opcode: 0,
                source: CodecError::TooShort {
                    expected: 1,
                    actual: 0,
                },
            });
        };
        let ctor = self
            .lookup(opcode, from_server)
            .ok_or(RegistryError::UnknownOpcode {
                opcode,
                from_server,
            })?;

        let mut msg = ctor();
        let consumed = msg
            .decode(buf)
            .map_err(|source| RegistryError::Decode { opcode, source })?;
        if consumed == 0 || consumed > buf.len() {
            return Err(RegistryError::Decode {
                opcode,
                source: CodecError::InvalidFormat(format!(
                    "decoder consumed {consumed} of {} bytes",
                    buf.len()
                )),
            });
        }
        Ok((msg, consumed))
    }

    /// Split a payload of concatenated encodings into messages.
    ///
    /// Fails on the first undecodable message; callers drop the whole payload.
    pub fn decode_all(
        &self,
        mut buf: &[u8],
        from_server: bool,
    ) -> Result<Vec<Box<dyn Message>>, RegistryError> {
        let mut out = Vec::new();
        while !buf.is_empty() {
            let (msg, consumed) = self.decode(buf, from_server)?;
            out.push(msg);
            buf = &buf[consumed..];
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::testing::{Say, Tick};
    use crate::message::{WireReader, WireWriter, encode_messages};

    /// Server-to-client shape of opcode 0x01.
    #[derive(Debug, Default, Clone, PartialEq)]
    struct ServerTick {
        n: u32,
        stamp: u16,
    }

    impl Message for ServerTick {
        fn opcode(&self) -> u8 {
            0x01
        }

        fn encoded_size(&self) -> usize {
            7
        }

        fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
            let mut w = WireWriter::new(buf);
            w.put_u8(self.opcode())?;
            w.put_u32(self.n)?;
            w.put_u16(self.stamp)?;
            Ok(w.written())
        }

        fn decode(&mut self, buf: &[u8]) -> Result<usize, CodecError> {
            let mut r = WireReader::new(buf);
            r.expect_opcode(self.opcode())?;
            self.n = r.get_u32()?;
            self.stamp = r.get_u16()?;
            Ok(r.consumed())
        }
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = Registry::new();
        registry.try_register::<Tick>(Direction::Any).unwrap();
        assert_eq!(
            registry.try_register::<Tick>(Direction::Any),
            Err(RegistryError::Duplicate {
                opcode: 0x01,
                tier: Direction::Any
            })
        );
        // Same opcode in a different tier is allowed.
        registry
            .try_register::<ServerTick>(Direction::FromServer)
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    #[should_panic(expected = "duplicate registration")]
    fn test_register_panics_on_duplicate() {
        let mut registry = Registry::new();
        registry
            .register::<Tick>(Direction::FromClient)
            .register::<Tick>(Direction::FromClient);
    }

    #[test]
    fn test_directional_lookup() {
        let mut registry = Registry::new();
        registry
            .register::<ServerTick>(Direction::FromServer)
            .register::<Tick>(Direction::FromClient);

        let server_msg = ServerTick { n: 9, stamp: 3 };
        let buf = server_msg.encode_to_vec().unwrap();
        let (msg, consumed) = registry.decode(&buf, true).unwrap();
        assert_eq!(consumed, 7);
        assert_eq!(msg.downcast_ref::<ServerTick>(), Some(&server_msg));

        let client_msg = Tick { n: 9 };
        let buf = client_msg.encode_to_vec().unwrap();
        let (msg, _) = registry.decode(&buf, false).unwrap();
        assert_eq!(msg.downcast_ref::<Tick>(), Some(&client_msg));
    }

    #[test]
    fn test_any_tier_wins() {
        let mut registry = Registry::new();
        registry
            .register::<Tick>(Direction::Any)
            .register::<ServerTick>(Direction::FromServer);
        let buf = Tick { n: 1 }.encode_to_vec().unwrap();
        let (msg, _) = registry.decode(&buf, true).unwrap();
        assert!(msg.is::<Tick>());
    }

    #[test]
    fn test_unknown_opcode() {
        let registry = Registry::new();
        assert_eq!(
            registry.decode(&[0x42, 0, 0], false).unwrap_err(),
            RegistryError::UnknownOpcode {
                opcode: 0x42,
                from_server: false
            }
        );
    }

    #[test]
    fn test_decode_all() {
        let registry = crate::message::testing::registry();
        let a = Tick { n: 1 };
        let b = Say {
            name: "ann".into(),
            body: vec![4, 5, 6],
        };
        let payload = encode_messages(&[&a, &b, &a]).unwrap();
        let msgs = registry.decode_all(&payload, false).unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1].downcast_ref::<Say>(), Some(&b));
        assert!(registry.decode_all(&[], false).unwrap().is_empty());
    }

    #[test]
    fn test_decode_all_truncated() {
        let registry = crate::message::testing::registry();
        let mut payload = encode_messages(&[&Tick { n: 1 }, &Tick { n: 2 }]).unwrap();
        payload.pop();
        assert!(matches!(
            registry.decode_all(&payload, false),
            Err(RegistryError::Decode { opcode: 0x01, .. })
        ));
    }
}
