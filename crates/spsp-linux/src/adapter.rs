// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw-socket injection adapter.
//!
//! Binds a `PF_PACKET` socket to a monitor-mode interface, attaches the
//! ESP-NOW BPF filter, and runs a capture thread around a `mio` poll. Sends
//! are retransmitted until the link-layer ACK is captured or the retry
//! budget runs out.

use crate::ieee80211;
use parking_lot::{Condvar, Mutex, RwLock};
use spsp::local::{RecvCallback, SendCallback};
use spsp::{Adapter, AdapterError, MacAddr};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long one transmission waits for its link-layer ACK.
const ACK_TIMEOUT: Duration = Duration::from_millis(50);
/// Capture buffer size; generously above any ESP-NOW frame.
const MAX_CAPTURE_SIZE: usize = 512;

const TOKEN_SOCKET: mio::Token = mio::Token(0);
const TOKEN_SHUTDOWN: mio::Token = mio::Token(1);

/// Raw socket wrapper closing the descriptor on drop.
struct RawSocket {
    fd: RawFd,
}

impl RawSocket {
    fn new() -> Result<Self, AdapterError> {
        // SAFETY: plain socket(2) call, descriptor ownership stays here.
        let fd = unsafe {
            libc::socket(
                libc::PF_PACKET,
                libc::SOCK_RAW,
                (libc::ETH_P_ALL as u16).to_be() as libc::c_int,
            )
        };
        if fd == -1 {
            return Err(errno("socket"));
        }
        Ok(RawSocket { fd })
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        // SAFETY: fd is owned by this wrapper and closed exactly once.
        unsafe { libc::close(self.fd) };
    }
}

fn errno(what: &str) -> AdapterError {
    AdapterError::new(format!("{}: {}", what, io::Error::last_os_error()))
}

struct Inner {
    sock: RawSocket,
    local_addr: MacAddr,
    retransmits: u8,
    /// Serializes transmissions; the ACK condvar pairs with it.
    tx_mutex: Mutex<()>,
    ack_cv: Condvar,
    recv_cb: RwLock<Option<RecvCallback>>,
    send_cb: RwLock<Option<SendCallback>>,
}

/// 802.11 injection adapter for a Linux monitor-mode interface.
pub struct InjectionAdapter {
    inner: Arc<Inner>,
    waker: mio::Waker,
    capture_thread: Option<JoinHandle<()>>,
}

impl InjectionAdapter {
    /// Opens `ifname` (must be in monitor mode) and starts capturing.
    /// `retransmits` bounds delivery retries per send.
    pub fn new(ifname: &str, retransmits: u8) -> Result<Self, AdapterError> {
        let sock = RawSocket::new()?;

        let ifindex = interface_index(sock.fd, ifname)?;
        bind_to_interface(sock.fd, ifindex)?;
        let local_addr = interface_mac(sock.fd, ifname)?;
        attach_filter(sock.fd, local_addr)?;
        set_nonblocking(sock.fd)?;

        let mut poll = mio::Poll::new().map_err(AdapterError::from)?;
        let waker = mio::Waker::new(poll.registry(), TOKEN_SHUTDOWN).map_err(AdapterError::from)?;
        poll.registry()
            .register(
                &mut mio::unix::SourceFd(&sock.fd),
                TOKEN_SOCKET,
                mio::Interest::READABLE,
            )
            .map_err(AdapterError::from)?;

        let inner = Arc::new(Inner {
            sock,
            local_addr,
            retransmits,
            tx_mutex: Mutex::new(()),
            ack_cv: Condvar::new(),
            recv_cb: RwLock::new(None),
            send_cb: RwLock::new(None),
        });

        let capture_inner = Arc::clone(&inner);
        let capture_thread = std::thread::Builder::new()
            .name("spsp-linux-capture".into())
            .spawn(move || capture_loop(&capture_inner, &mut poll))
            .map_err(|e| AdapterError::new(format!("capture thread: {}", e)))?;

        log::info!(
            "[Adapter] capturing on {} as {}",
            ifname,
            local_addr.to_hex()
        );

        Ok(InjectionAdapter {
            inner,
            waker,
            capture_thread: Some(capture_thread),
        })
    }
}

impl Drop for InjectionAdapter {
    fn drop(&mut self) {
        if let Err(e) = self.waker.wake() {
            log::error!(
                "[Adapter] capture thread shutdown notification failed: {}",
                e
            );
        }
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Adapter for InjectionAdapter {
    fn send(&self, dst: MacAddr, frame: &[u8]) -> Result<(), AdapterError> {
        let packet = ieee80211::build_action_frame(dst, self.inner.local_addr, frame);

        let mut attempts: u8 = 0;
        let delivered = loop {
            let acked = {
                let mut tx = self.inner.tx_mutex.lock();

                log::debug!(
                    "[Adapter] send: {} bytes on 802.11, attempt {}",
                    packet.len(),
                    attempts
                );
                // SAFETY: writes the packet buffer to our own descriptor.
                let written = unsafe {
                    libc::write(self.inner.sock.fd, packet.as_ptr().cast(), packet.len())
                };
                if written < 0 {
                    return Err(errno("send"));
                }

                // The capture thread notifies on our ACK
                !self.inner.ack_cv.wait_for(&mut tx, ACK_TIMEOUT).timed_out()
            };

            if acked {
                break true;
            }
            attempts += 1;
            if attempts >= self.inner.retransmits {
                break false;
            }
        };

        if self.inner.send_cb.read().is_some() {
            // Confirmation from its own thread, per the adapter contract
            let inner = Arc::clone(&self.inner);
            std::thread::spawn(move || {
                if let Some(cb) = inner.send_cb.read().as_ref() {
                    cb(dst, delivered);
                }
            });
        }
        Ok(())
    }

    fn add_peer(&self, _peer: MacAddr) -> Result<(), AdapterError> {
        // Monitor-mode capture needs no peer registration
        Ok(())
    }

    fn remove_peer(&self, _peer: MacAddr) -> Result<(), AdapterError> {
        Ok(())
    }

    fn set_recv_cb(&self, cb: RecvCallback) {
        *self.inner.recv_cb.write() = Some(cb);
    }

    fn set_send_cb(&self, cb: SendCallback) {
        *self.inner.send_cb.write() = Some(cb);
    }

    fn local_addr(&self) -> MacAddr {
        self.inner.local_addr
    }
}

fn capture_loop(inner: &Arc<Inner>, poll: &mut mio::Poll) {
    let mut events = mio::Events::with_capacity(4);
    let mut buf = [0u8; MAX_CAPTURE_SIZE];

    loop {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            log::error!("[Adapter] poll failed: {}", e);
            return;
        }

        for event in events.iter() {
            match event.token() {
                TOKEN_SHUTDOWN => return,
                TOKEN_SOCKET => {
                    // Edge-triggered: drain until the socket would block
                    loop {
                        // SAFETY: reads into a local buffer from our own
                        // descriptor.
                        let len = unsafe {
                            libc::read(inner.sock.fd, buf.as_mut_ptr().cast(), buf.len())
                        };
                        if len < 0 {
                            let err = io::Error::last_os_error();
                            if err.kind() != io::ErrorKind::WouldBlock {
                                log::error!("[Adapter] receive read: {}", err);
                            }
                            break;
                        }
                        if len == 0 {
                            break;
                        }
                        process_capture(inner, &buf[..len as usize]);
                    }
                }
                _ => {}
            }
        }
    }
}

fn process_capture(inner: &Arc<Inner>, data: &[u8]) {
    let Some(radiotap) = ieee80211::parse_radiotap(data) else {
        log::debug!("[Adapter] receive raw: radiotap is invalid");
        return;
    };
    let frame = &data[radiotap.len..];
    let rssi = radiotap.rssi.unwrap_or(i32::MIN);

    if let Some(action) = ieee80211::parse_action_frame(frame) {
        if inner.recv_cb.read().is_none() {
            return;
        }
        // Fresh thread: the receive handler will want to send replies
        // through this very adapter.
        let inner = Arc::clone(inner);
        let src = action.src;
        let payload = action.payload.to_vec();
        std::thread::spawn(move || {
            if let Some(cb) = inner.recv_cb.read().as_ref() {
                cb(src, payload, rssi);
            }
        });
    } else if ieee80211::is_ack_for(frame, inner.local_addr) {
        log::debug!("[Adapter] receive raw ACK");
        inner.ack_cv.notify_one();
    } else {
        log::debug!("[Adapter] receive raw: unhandled frame");
    }
}

fn interface_index(fd: RawFd, ifname: &str) -> Result<libc::c_int, AdapterError> {
    let mut req = ifreq_for(ifname)?;
    // SAFETY: SIOCGIFINDEX fills ifr_ifindex for the named interface.
    if unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut req) } < 0 {
        return Err(errno("get interface index"));
    }
    // SAFETY: the kernel initialized this union member above.
    Ok(unsafe { req.ifr_ifru.ifru_ifindex })
}

fn interface_mac(fd: RawFd, ifname: &str) -> Result<MacAddr, AdapterError> {
    let mut req = ifreq_for(ifname)?;
    // SAFETY: SIOCGIFHWADDR fills ifr_hwaddr for the named interface.
    if unsafe { libc::ioctl(fd, libc::SIOCGIFHWADDR, &mut req) } < 0 {
        return Err(errno("get MAC"));
    }
    let mut mac = [0u8; 6];
    // SAFETY: the kernel initialized this union member above.
    let sa_data = unsafe { req.ifr_ifru.ifru_hwaddr.sa_data };
    for (out, byte) in mac.iter_mut().zip(sa_data.iter()) {
        *out = *byte as u8;
    }
    Ok(MacAddr(mac))
}

fn ifreq_for(ifname: &str) -> Result<libc::ifreq, AdapterError> {
    if ifname.len() >= libc::IFNAMSIZ {
        return Err(AdapterError::new(format!(
            "interface name too long: {}",
            ifname
        )));
    }
    // SAFETY: ifreq is plain-old-data; zeroed is a valid value.
    let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in req.ifr_name.iter_mut().zip(ifname.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    Ok(req)
}

fn bind_to_interface(fd: RawFd, ifindex: libc::c_int) -> Result<(), AdapterError> {
    // SAFETY: sockaddr_ll is plain-old-data; zeroed is a valid value.
    let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    addr.sll_family = libc::PF_PACKET as libc::c_ushort;
    addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
    addr.sll_ifindex = ifindex;

    // SAFETY: binds our descriptor with a correctly sized sockaddr_ll.
    let ret = unsafe {
        libc::bind(
            fd,
            std::ptr::addr_of!(addr).cast(),
            std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(errno("bind"));
    }
    Ok(())
}

fn attach_filter(fd: RawFd, local: MacAddr) -> Result<(), AdapterError> {
    let mut prog = ieee80211::bpf_filter(local);
    let fprog = libc::sock_fprog {
        len: prog.len() as libc::c_ushort,
        filter: prog.as_mut_ptr(),
    };

    // SAFETY: fprog points at the program vector, alive for the call.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            std::ptr::addr_of!(fprog).cast(),
            std::mem::size_of::<libc::sock_fprog>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(errno("attach filter"));
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> Result<(), AdapterError> {
    // SAFETY: standard fcntl flag manipulation on our own descriptor.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(errno("set nonblocking"));
        }
    }
    Ok(())
}
