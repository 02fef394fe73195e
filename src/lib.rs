//! Passive pcap capture synthesis.
//!
//! A [`data_capture::CaptureSession`] watches connection lifecycle and payload
//! events and writes an equivalent Ethernet/IPv4/TCP-or-UDP packet trace in
//! classic pcap format, without touching the real traffic. The `pcapline`
//! binary wraps it in a TCP relay that records every proxied connection.

pub mod configuration;
pub mod data_capture;
pub mod error_handling;
pub mod network;
pub mod pcap;
