//! The master event loop. One `Service` value owns every connection and
//! a single poll; a 10 ms tick derived from the poll timeout advances
//! all RX/TX timers.

use crate::config::Config;
use crate::signals;
use crate::tty::SerialLine;
use df1::connection::{Connection, TOKENS_PER_CONNECTION};
use df1::logging::{self, Logger};
use df1::shared::ErrorUtils;
use mio;
use mio::net::TcpListener;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(10);

pub struct Service {
    poll: mio::Poll,
    events: mio::Events,
    connections: Vec<Option<Connection<SerialLine>>>,
    log: Logger,
}

impl Service {
    pub fn new(log: &Logger) -> io::Result<Service> {
        Ok(Service {
            poll: mio::Poll::new()?,
            events: mio::Events::with_capacity(1024),
            connections: Vec::new(),
            log: log.new(logging::o!()),
        })
    }

    /// Bring up every configured connection, tearing down whatever was
    /// running before. Lines that fail to open are logged and skipped;
    /// the rest of the service keeps going.
    pub fn configure(&mut self, config: &Config) -> usize {
        self.teardown();

        for entry in &config.connections {
            let idx = self.connections.len();

            match self.bring_up(idx, entry) {
                Ok(connection) => {
                    logging::info!(self.log, "connection up";
                                   "name" => &entry.name,
                                   "device" => &entry.device,
                                   "port" => entry.port);
                    self.connections.push(Some(connection));
                }
                Err(err) => {
                    logging::error!(self.log, "connection bring-up failed";
                                    "name" => &entry.name,
                                    "error" => %err);
                    self.connections.push(None);
                }
            }
        }

        self.connections.iter().flatten().count()
    }

    fn bring_up(&self, idx: usize, entry: &crate::config::ConnectionConfig) -> io::Result<Connection<SerialLine>> {
        let settings = entry
            .settings()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

        let line = SerialLine::open(&entry.device, settings.baud)?;

        let addr: SocketAddr = format!("0.0.0.0:{}", entry.port)
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad listen port"))?;
        let listener = TcpListener::bind(&addr)?;

        let connection = Connection::new(line, listener, &settings, idx * TOKENS_PER_CONNECTION, &self.log);

        if connection.register(&self.poll).has_failed() {
            return Err(io::Error::new(io::ErrorKind::Other, "poll registration failed"));
        }

        Ok(connection)
    }

    /// Run until a shutdown signal arrives. SIGHUP reloads the
    /// configuration in place.
    pub fn run(&mut self, config_path: &Path) -> io::Result<()> {
        let mut next_tick = Instant::now() + TICK;

        while !signals::shutdown() {
            if signals::take_reload() {
                logging::info!(self.log, "reloading configuration");

                match Config::load(config_path) {
                    Ok(config) => {
                        let count = self.configure(&config);
                        logging::info!(self.log, "configuration reloaded"; "connections" => count);
                    }
                    Err(err) => {
                        logging::error!(self.log, "reload failed, keeping old configuration"; "error" => %err);
                    }
                }
            }

            let now = Instant::now();
            let timeout = match next_tick > now {
                true => next_tick - now,
                false => Duration::from_millis(0),
            };

            self.poll.poll(&mut self.events, Some(timeout))?;

            let mut dead = Vec::new();
            for event in &self.events {
                let token = usize::from(event.token());
                let idx = token / TOKENS_PER_CONNECTION;

                if let Some(Some(connection)) = self.connections.get_mut(idx) {
                    if connection
                        .handle_event(&self.poll, token, event.readiness())
                        .has_failed()
                    {
                        dead.push(idx);
                    }
                }
            }

            for idx in dead {
                self.drop_connection(idx);
            }

            let now = Instant::now();
            if now >= next_tick {
                for connection in self.connections.iter_mut().flatten() {
                    connection.tick();
                }

                next_tick += TICK;
                // Resynchronise after a long stall instead of firing a
                // burst of catch-up ticks.
                if next_tick < now {
                    next_tick = now + TICK;
                }
            }

            for idx in 0..self.connections.len() {
                let failed = match &mut self.connections[idx] {
                    Some(connection) => connection.flush(&self.poll).has_failed(),
                    None => false,
                };

                if failed {
                    self.drop_connection(idx);
                }
            }
        }

        logging::info!(self.log, "shutdown requested");
        self.teardown();
        Ok(())
    }

    fn drop_connection(&mut self, idx: usize) {
        if let Some(mut connection) = self.connections[idx].take() {
            logging::error!(self.log, "connection lost"; "index" => idx);
            connection.close(&self.poll);
        }
    }

    fn teardown(&mut self) {
        for idx in 0..self.connections.len() {
            if let Some(mut connection) = self.connections[idx].take() {
                connection.close(&self.poll);
            }
        }

        self.connections.clear();
    }
}
