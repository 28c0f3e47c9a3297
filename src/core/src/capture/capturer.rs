//! Session table and job assembly.
//!
//! The capturer turns classified TCP segments into sealed jobs. The packet
//! loop (a dedicated thread, libpcap reads block) calls [`Capturer::handle_packet`]
//! for every decoded frame; a 100 ms sweeper closes idle sessions; shutdown
//! drains whatever is still open. The session mutex covers only the
//! classify/lookup/append window — persistence and reprint bookkeeping run
//! after the lock is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use super::packet_source::{decode_packet, PacketSource};
use super::session::TapSession;
use super::stats::Stats;
use super::types::{DecodedPacket, Flow, FlowDirection, SessionKey};
use crate::configuration::config::Config;
use crate::job::reprint::ReprintDetector;
use crate::job::store::Store;
use crate::job::types::{Job, Transport};
use crate::upload::uploader::Uploader;

const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

pub struct Capturer {
    config: Config,
    store: Arc<Store>,
    reprint: Arc<ReprintDetector>,
    stats: Arc<Stats>,
    uploader: Option<Arc<Uploader>>,
    sessions: Mutex<HashMap<SessionKey, TapSession>>,
    done: AtomicBool,
}

impl Capturer {
    pub fn new(
        config: Config,
        store: Arc<Store>,
        reprint: Arc<ReprintDetector>,
        stats: Arc<Stats>,
        uploader: Option<Arc<Uploader>>,
    ) -> Self {
        Self {
            config,
            store,
            reprint,
            stats,
            uploader,
            sessions: Mutex::new(HashMap::new()),
            done: AtomicBool::new(false),
        }
    }

    /// Blocking packet loop. Runs until shutdown or until the capture handle
    /// reports an unrecoverable error.
    pub fn run_capture_loop(&self, mut source: PacketSource) {
        loop {
            if self.done.load(Ordering::Relaxed) {
                return;
            }
            match source.next_packet() {
                Ok(packet) => {
                    if let Some(decoded) = decode_packet(packet.data) {
                        self.handle_packet(&decoded);
                    }
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(pcap::Error::NoMorePackets) => return,
                Err(e) => {
                    error!("capture read failed: {}", e);
                    return;
                }
            }
        }
    }

    /// Classifies one TCP segment and advances its session.
    pub fn handle_packet(&self, pkt: &DecodedPacket) {
        if self.done.load(Ordering::Relaxed) {
            return;
        }
        let flow = match self.classify(pkt) {
            Some(flow) => flow,
            None => return,
        };

        let finished = {
            let mut sessions = self.sessions.lock().unwrap();

            if pkt.fin || pkt.rst {
                sessions.remove(&flow.key)
            } else if flow.direction == FlowDirection::FromPrinter {
                // Printer-side traffic (ACKs) only matters for close detection.
                None
            } else {
                match sessions.get_mut(&flow.key) {
                    Some(session) => {
                        session.last_seen = Instant::now();
                        if self.try_append(session, pkt) {
                            sessions.remove(&flow.key)
                        } else {
                            None
                        }
                    }
                    None => {
                        if pkt.syn {
                            let session = self.new_session(&flow);
                            debug!(
                                "new session {}:{} -> {}:{} job_id={}",
                                flow.key.client_ip,
                                flow.key.client_port,
                                flow.key.printer_ip,
                                flow.key.printer_port,
                                session.job.metadata.job_id
                            );
                            sessions.insert(flow.key, session);
                            None
                        } else if self.config.capture.allow_late_start && !pkt.payload.is_empty() {
                            let mut session = self.new_session(&flow);
                            debug!(
                                "late-start session {}:{} -> {}:{} job_id={}",
                                flow.key.client_ip,
                                flow.key.client_port,
                                flow.key.printer_ip,
                                flow.key.printer_port,
                                session.job.metadata.job_id
                            );
                            if self.try_append(&mut session, pkt) {
                                Some(session)
                            } else {
                                sessions.insert(flow.key, session);
                                None
                            }
                        } else {
                            None
                        }
                    }
                }
            }
        };

        if let Some(session) = finished {
            self.finalize_session(session);
        }
    }

    /// Closes sessions idle for at least the configured timeout.
    pub fn check_timeouts(&self) {
        let expired: Vec<TapSession> = {
            let mut sessions = self.sessions.lock().unwrap();
            let now = Instant::now();
            let idle_timeout = self.config.capture.idle_timeout();
            let keys: Vec<SessionKey> = sessions
                .iter()
                .filter(|(_, s)| now.duration_since(s.last_seen) >= idle_timeout)
                .map(|(k, _)| *k)
                .collect();
            keys.iter().filter_map(|k| sessions.remove(k)).collect()
        };

        for session in expired {
            self.finalize_session(session);
        }
    }

    /// 100 ms sweep driving idle-timeout closure.
    pub async fn run_timeout_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => self.check_timeouts(),
            }
        }
    }

    /// Stops accepting packets and drains the session table, finalizing every
    /// open session for best-effort persistence of in-flight jobs.
    pub fn shutdown(&self) {
        self.done.store(true, Ordering::Relaxed);

        let drained: Vec<TapSession> = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.drain().map(|(_, s)| s).collect()
        };
        if !drained.is_empty() {
            info!("draining {} open session(s)", drained.len());
        }
        for session in drained {
            self.finalize_session(session);
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn classify(&self, pkt: &DecodedPacket) -> Option<Flow> {
        if self.is_printer_port(pkt.dst_port) {
            Some(Flow {
                direction: FlowDirection::TowardPrinter,
                key: SessionKey {
                    client_ip: pkt.src_ip,
                    client_port: pkt.src_port,
                    printer_ip: pkt.dst_ip,
                    printer_port: pkt.dst_port,
                },
                transport: Transport::from_port(pkt.dst_port)?,
            })
        } else if self.is_printer_port(pkt.src_port) {
            Some(Flow {
                direction: FlowDirection::FromPrinter,
                key: SessionKey {
                    client_ip: pkt.dst_ip,
                    client_port: pkt.dst_port,
                    printer_ip: pkt.src_ip,
                    printer_port: pkt.src_port,
                },
                transport: Transport::from_port(pkt.src_port)?,
            })
        } else {
            None
        }
    }

    fn is_printer_port(&self, port: u16) -> bool {
        (port == 9100 && self.config.capture.port_9100_enabled)
            || (port == 515 && self.config.capture.port_515_enabled)
    }

    fn new_session(&self, flow: &Flow) -> TapSession {
        TapSession::new(Job::new(
            &self.config.device_id,
            &self.config.site_id,
            flow.key.printer_ip,
            flow.key.printer_port,
            flow.key.client_ip,
            flow.transport,
        ))
    }

    /// Appends a payload-bearing segment to an open session. Returns true
    /// when the session must be closed (payload cap exceeded).
    fn try_append(&self, session: &mut TapSession, pkt: &DecodedPacket) -> bool {
        if pkt.payload.is_empty() {
            return false;
        }
        if !session.accept_seq(pkt.seq) {
            return false;
        }

        let cap = self.config.capture.max_job_bytes;
        if cap > 0 && session.job.len() as u64 + pkt.payload.len() as u64 > cap {
            warn!(
                "job {} would exceed max_job_bytes={}; closing as truncated",
                session.job.metadata.job_id, cap
            );
            session.job.add_tag("truncated");
            return true;
        }

        if session.job.append(pkt.payload) {
            self.stats
                .bytes_captured
                .fetch_add(pkt.payload.len() as u64, Ordering::Relaxed);
        }
        false
    }

    /// Seals a job, runs reprint detection, persists, and hands the path to
    /// the uploader. The hash is recorded for future reprint detection only
    /// after a successful save.
    fn finalize_session(&self, session: TapSession) {
        let mut job = session.job;
        job.close();

        // A truncated job may hold nothing (its first segment alone blew the
        // cap) and is still persisted; only untagged empty jobs are dropped.
        if job.is_empty() && !job.has_tag("truncated") {
            debug!("skipping empty job {}", job.metadata.job_id);
            return;
        }

        let printer_ip = job.metadata.printer_ip;
        if let Some(original_id) = self.reprint.check(job.hash(), printer_ip) {
            job.set_reprint_of(original_id);
            info!(
                "reprint detected job_id={} original_id={}",
                job.metadata.job_id, original_id
            );
        }

        let job_id = job.metadata.job_id;
        let hash = job.metadata.sha256.clone();
        let src_ip = job.metadata.src_ip;
        let byte_len = job.metadata.byte_len;
        let transport = job.metadata.transport;

        match self.store.save(job) {
            Ok(base) => {
                self.reprint.record(&hash, printer_ip, job_id);
                self.stats.jobs_captured.fetch_add(1, Ordering::Relaxed);
                info!(
                    "job captured job_id={} printer_ip={} src_ip={} bytes={} transport={}",
                    job_id, printer_ip, src_ip, byte_len, transport
                );
                if let Some(uploader) = &self.uploader {
                    uploader.enqueue(base);
                }
            }
            Err(e) => {
                self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                error!("failed to save job {}: {}", job_id, e);
            }
        }
    }
}
