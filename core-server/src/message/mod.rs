//! Message broker hosted by the coordinator
//!
//! The in-process side of the bus is a [`MemoryBus`]; the
//! [`TcpBusServer`] bridges remote edge connections onto it:
//!
//! ```text
//! edge ── TCP frame ──▶ TcpBusServer ──▶ MemoryBus.publish(topic)
//!                            ▲                    │
//!                            └──── tap() ◀────────┘
//!                        (every frame forwarded to
//!                         every connected edge)
//! ```
//!
//! Topic selectivity lives client-side; the ingestor's dst filter does
//! the node-level routing.
//!
//! [`MemoryBus`]: shared::bus::MemoryBus

mod tcp_server;

pub use tcp_server::TcpBusServer;
