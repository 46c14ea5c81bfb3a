use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

pub type Addr = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemCmd {
    Read,
    Write,
}

impl MemCmd {
    fn short(self) -> &'static str {
        match self {
            Self::Read => "R",
            Self::Write => "W",
        }
    }
}

thread_local! {
    static NEXT_PACKET_ID: Cell<u64> = const { Cell::new(0) };
}

fn next_packet_id() -> u64 {
    NEXT_PACKET_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    })
}

/// Unit of work flowing through ports.  Address, size and command never change once the packet
/// is built; only the payload is filled in along the way.
#[derive(Debug)]
pub struct Packet {
    id: u64,
    addr: Addr,
    size: usize,
    cmd: MemCmd,
    data: RefCell<Vec<u32>>,
}

/// Packets are shared by every queue that currently references them; the last holder frees it.
pub type PacketPtr = Rc<Packet>;

impl Packet {
    pub fn new(addr: Addr, size: usize, cmd: MemCmd) -> PacketPtr {
        Rc::new(Self {
            id: next_packet_id(),
            addr,
            size,
            cmd,
            data: RefCell::new(Vec::new()),
        })
    }

    pub fn read(addr: Addr, size: usize) -> PacketPtr {
        Self::new(addr, size, MemCmd::Read)
    }

    pub fn write(addr: Addr, data: Vec<u32>) -> PacketPtr {
        let size = data.len() * std::mem::size_of::<u32>();
        let pkt = Self::new(addr, size, MemCmd::Write);
        pkt.set_data(data);
        pkt
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> Addr {
        self.addr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cmd(&self) -> MemCmd {
        self.cmd
    }

    pub fn is_read(&self) -> bool {
        self.cmd == MemCmd::Read
    }

    pub fn is_write(&self) -> bool {
        self.cmd == MemCmd::Write
    }

    pub fn data(&self) -> Vec<u32> {
        self.data.borrow().clone()
    }

    pub fn has_data(&self) -> bool {
        !self.data.borrow().is_empty()
    }

    pub fn set_data(&self, data: Vec<u32>) {
        *self.data.borrow_mut() = data;
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pkt#{} {} addr={:#x} size={}",
            self.id,
            self.cmd.short(),
            self.addr,
            self.size
        )
    }
}
