//! Shared 16-bit address bus and the capabilities of things attached to it.
//!
//! Components claim addresses by answering [`Component::read`] with `Some`;
//! the bus asks each attached component in attachment order and returns the
//! first answer, or `0xFF` when nobody claims the address. Writes are
//! broadcast to every component, each deciding for itself whether the
//! address concerns it.

use std::cell::RefCell;
use std::rc::Rc;

/// Anything addressable over the bus.
pub trait Component {
    /// Returns the byte at `address`, or `None` if this component does not
    /// respond to that address.
    fn read(&mut self, address: u16) -> Option<u8>;

    /// Writes `data` at `address`; components ignore addresses that do not
    /// concern them.
    fn write(&mut self, address: u16, data: u8);
}

/// Anything driven by the machine clock, one M-cycle at a time.
pub trait Clocked {
    fn cycle(&mut self, cycle: u64);
}

/// Cheaply cloneable handle to a shared bus.
///
/// All clones see the same set of attached components.
#[derive(Clone, Default)]
pub struct Bus {
    components: Rc<RefCell<Vec<Rc<RefCell<dyn Component>>>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a component; it is consulted after everything attached
    /// before it.
    pub fn attach(&self, component: Rc<RefCell<dyn Component>>) {
        self.components.borrow_mut().push(component);
    }

    /// Reads the byte at `address`, `0xFF` if no component claims it.
    pub fn read(&self, address: u16) -> u8 {
        for component in self.components.borrow().iter() {
            if let Some(data) = component.borrow_mut().read(address) {
                return data;
            }
        }
        0xFF
    }

    /// Broadcasts a write to every attached component.
    pub fn write(&self, address: u16, data: u8) {
        for component in self.components.borrow().iter() {
            component.borrow_mut().write(address, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneByte {
        address: u16,
        value: u8,
        writes: Vec<(u16, u8)>,
    }

    impl OneByte {
        fn new(address: u16, value: u8) -> Rc<RefCell<Self>> {
            Rc::new(RefCell::new(Self {
                address,
                value,
                writes: Vec::new(),
            }))
        }
    }

    impl Component for OneByte {
        fn read(&mut self, address: u16) -> Option<u8> {
            (address == self.address).then_some(self.value)
        }

        fn write(&mut self, address: u16, data: u8) {
            self.writes.push((address, data));
        }
    }

    #[test]
    fn unclaimed_addresses_read_as_ff() {
        let bus = Bus::new();
        assert_eq!(bus.read(0x1234), 0xFF);
        bus.attach(OneByte::new(0x0000, 0x42));
        assert_eq!(bus.read(0x1234), 0xFF);
    }

    #[test]
    fn first_attached_component_wins() {
        let bus = Bus::new();
        bus.attach(OneByte::new(0x8000, 0x11));
        bus.attach(OneByte::new(0x8000, 0x22));
        assert_eq!(bus.read(0x8000), 0x11);
    }

    #[test]
    fn writes_reach_every_component() {
        let bus = Bus::new();
        let a = OneByte::new(0x0000, 0);
        let b = OneByte::new(0x0001, 0);
        bus.attach(a.clone());
        bus.attach(b.clone());
        bus.write(0xC000, 0x7F);
        assert_eq!(a.borrow().writes, vec![(0xC000, 0x7F)]);
        assert_eq!(b.borrow().writes, vec![(0xC000, 0x7F)]);
    }

    #[test]
    fn clones_share_components() {
        let bus = Bus::new();
        let clone = bus.clone();
        clone.attach(OneByte::new(0x4000, 0x99));
        assert_eq!(bus.read(0x4000), 0x99);
    }
}
