//! Test fixtures: in-memory services and loopback sockets.

mod rendezvous;

pub use rendezvous::{
    FAST, MockLobby, MockSessions, MockSignaling, PollScript, RendezvousFixture, loopback,
};
