//! End-to-end integration tests
//!
//! Each test starts the finance, file and logging services on ephemeral
//! loopback ports, drives them through a [`ClientSession`], and then shuts
//! every service down. The audit log and file storage live in a temporary
//! directory per test.

#[cfg(test)]
mod tests {
    use netbank::client::{ClientSession, Endpoint, Endpoints, NoRetry, RetryCoordinator, ServiceKind};
    use netbank::core::ShutdownContext;
    use netbank::io::frame_codec::{read_frame, write_frame};
    use netbank::io::{decode_response, ListeningChannel};
    use netbank::service::{run_service, AuditLogHandler, FileHandler, FinanceHandler, ServiceConfig, DISCONNECT_ACK};
    use netbank::types::ServiceError;
    use rstest::rstest;
    use std::fs;
    use std::net::TcpStream;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tempfile::TempDir;

    const CAPACITY: usize = 10;

    /// One running service and the context that stops it
    struct Running {
        ctx: ShutdownContext,
        port: u16,
        thread: JoinHandle<Result<usize, ServiceError>>,
    }

    fn start<H: netbank::service::RequestHandler>(handler: Arc<H>) -> Running {
        let listener = ListeningChannel::bind("127.0.0.1:0")
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));
        let port = listener.local_addr().port();
        let ctx = ShutdownContext::new();
        // More workers than concurrent test clients; each client holds one
        // connection per service for its whole session.
        let config = ServiceConfig {
            workers: 16,
            accept_backoff: Duration::from_millis(10),
        };

        let service_ctx = ctx.clone();
        let thread = thread::spawn(move || run_service(listener, handler, &config, &service_ctx));
        Running { ctx, port, thread }
    }

    impl Running {
        fn stop(self) -> usize {
            self.ctx.request_shutdown();
            self.thread.join().unwrap().unwrap()
        }
    }

    /// All three services plus the state tests inspect directly
    struct Cluster {
        dir: TempDir,
        finance_handler: Arc<FinanceHandler>,
        finance: Running,
        file: Running,
        logging: Running,
    }

    impl Cluster {
        fn start() -> Self {
            let dir = TempDir::new().unwrap();
            let finance_handler = Arc::new(FinanceHandler::new(CAPACITY, 2, 0.01).unwrap());
            let file_handler = FileHandler::new(dir.path().join("storage"), &[".txt".to_string()]).unwrap();
            let log_handler = AuditLogHandler::open(dir.path().join("system.log")).unwrap();

            Cluster {
                finance: start(Arc::clone(&finance_handler)),
                file: start(Arc::new(file_handler)),
                logging: start(Arc::new(log_handler)),
                finance_handler,
                dir,
            }
        }

        fn endpoints(&self) -> Endpoints {
            Endpoints {
                finance: Endpoint::new("127.0.0.1", self.finance.port),
                file: Endpoint::new("127.0.0.1", self.file.port),
                logging: Endpoint::new("127.0.0.1", self.logging.port),
            }
        }

        fn session(&self) -> ClientSession {
            let retry = RetryCoordinator::new(ShutdownContext::new(), 1);
            ClientSession::connect(&self.endpoints(), retry, Box::new(NoRetry))
        }

        fn log_path(&self) -> PathBuf {
            self.dir.path().join("system.log")
        }

        fn audit_log(&self) -> String {
            fs::read_to_string(self.log_path()).unwrap()
        }

        /// Stop every service; returns the accepted connection counts
        fn stop(self) -> (TempDir, [usize; 3]) {
            let counts = [self.finance.stop(), self.file.stop(), self.logging.stop()];
            (self.dir, counts)
        }
    }

    #[test]
    fn test_overdraw_is_rejected_and_balance_kept() {
        let cluster = Cluster::start();
        let mut session = cluster.session();

        session.login(5).unwrap();
        session.deposit(100.0).unwrap();
        let result = session.withdraw(150.0);
        assert_eq!(
            result,
            Err(ServiceError::Rejected {
                message: "Insufficient funds".to_string()
            })
        );
        assert_eq!(session.balance().unwrap().response.balance, 100.0);

        drop(session);
        cluster.stop();
    }

    #[test]
    fn test_login_deposit_balance() {
        let cluster = Cluster::start();
        let mut session = cluster.session();

        session.login(5).unwrap();
        let deposit = session.deposit(50.0).unwrap();
        assert!(deposit.warnings.is_empty());
        assert_eq!(deposit.response.message, "Deposit successful");

        let balance = session.balance().unwrap();
        assert_eq!(balance.response.balance, 50.0);

        drop(session);
        cluster.stop();
    }

    #[rstest]
    #[case(2, 20.0)]
    #[case(8, 12.5)]
    fn test_concurrent_deposits_from_separate_clients(#[case] clients: usize, #[case] amount: f64) {
        let cluster = Cluster::start();
        let endpoints = cluster.endpoints();

        let handles: Vec<_> = (0..clients)
            .map(|_| {
                let endpoints = endpoints.clone();
                thread::spawn(move || {
                    let retry = RetryCoordinator::new(ShutdownContext::new(), 1);
                    let mut session = ClientSession::connect(&endpoints, retry, Box::new(NoRetry));
                    session.login(3).unwrap();
                    session.deposit(amount).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            cluster.finance_handler.ledger().balance(3).unwrap(),
            clients as f64 * amount
        );
        cluster.stop();
    }

    #[test]
    fn test_interest_accrual_over_network() {
        let cluster = Cluster::start();
        let mut session = cluster.session();

        session.login(4).unwrap();
        session.deposit(100.0).unwrap();
        let receipt = session.accrue_interest(2).unwrap();
        assert_eq!(receipt.response.message, "Interest accrual successful");
        assert_eq!(session.balance().unwrap().response.balance, 101.0);

        drop(session);
        cluster.stop();
    }

    #[test]
    fn test_garbled_frame_is_acknowledged_as_quit() {
        let cluster = Cluster::start();

        let mut raw = TcpStream::connect(("127.0.0.1", cluster.finance.port)).unwrap();
        write_frame(&mut raw, "99|1|0|x|y").unwrap();
        let response = decode_response(&read_frame(&mut raw).unwrap()).unwrap();

        assert!(response.ok);
        assert_eq!(response.message, DISCONNECT_ACK);
        assert!(cluster.finance_handler.ledger().active_ids().is_empty());
        cluster.stop();
    }

    #[test]
    fn test_out_of_range_account_touches_nothing() {
        let cluster = Cluster::start();
        let mut session = cluster.session();

        session.login(CAPACITY as i64).unwrap();
        let result = session.withdraw(1.0);
        assert_eq!(
            result,
            Err(ServiceError::Rejected {
                message: "Invalid account ID".to_string()
            })
        );
        assert!(cluster.finance_handler.ledger().active_ids().is_empty());

        drop(session);
        cluster.stop();
    }

    #[test]
    fn test_upload_then_download() {
        let cluster = Cluster::start();
        let mut session = cluster.session();
        session.login(1).unwrap();

        let upload = session.upload_file("notes.txt", "quarterly figures").unwrap();
        assert_eq!(upload.response.message, "File uploaded successfully");
        assert_eq!(
            fs::read_to_string(cluster.dir.path().join("storage").join("notes.txt")).unwrap(),
            "quarterly figures"
        );

        let download = session.download_file("notes.txt").unwrap();
        assert_eq!(download.response.payload, "quarterly figures");

        drop(session);
        cluster.stop();
    }

    #[rstest]
    #[case("run.exe", "data", "File extension not allowed")]
    #[case("README", "data", "File has no extension")]
    #[case("../escape.txt", "data", "Invalid file name")]
    #[case("table.txt", "a|b|c", "File contents contain the reserved '|' character")]
    fn test_upload_rejections(#[case] name: &str, #[case] contents: &str, #[case] message: &str) {
        let cluster = Cluster::start();
        let mut session = cluster.session();
        session.login(1).unwrap();

        assert_eq!(
            session.upload_file(name, contents),
            Err(ServiceError::Rejected {
                message: message.to_string()
            })
        );

        drop(session);
        cluster.stop();
    }

    #[test]
    fn test_download_missing_file() {
        let cluster = Cluster::start();
        let mut session = cluster.session();
        session.login(1).unwrap();

        assert_eq!(
            session.download_file("absent.txt"),
            Err(ServiceError::Rejected {
                message: "File not found".to_string()
            })
        );

        drop(session);
        cluster.stop();
    }

    #[test]
    fn test_every_transaction_is_audited() {
        let cluster = Cluster::start();
        let mut session = cluster.session();

        session.login(7).unwrap();
        session.deposit(30.0).unwrap();
        session.withdraw(10.0).unwrap();
        session.balance().unwrap();
        session.upload_file("a.txt", "x").unwrap();
        session.download_file("a.txt").unwrap();
        session.accrue_interest(1).unwrap();
        session.logout().unwrap();

        let log = cluster.audit_log();
        let events: Vec<&str> = log.lines().collect();
        assert!(events[0].starts_with("=== Logging server started on port"));
        assert!(events[1].starts_with("[7]: logged in from 127.0.0.1:"));
        assert_eq!(events[2], "[7]: deposited 30");
        assert_eq!(events[3], "[7]: withdrew 10");
        assert_eq!(events[4], "[7]: viewed balance: 20");
        assert_eq!(events[5], "[7]: uploaded file: a.txt");
        assert_eq!(events[6], "[7]: downloaded file: a.txt");
        assert_eq!(events[7], "[7]: accrued interest in all accounts");
        assert!(events[8].starts_with("[7]: logged out from 127.0.0.1:"));

        drop(session);
        let (dir, _) = cluster.stop();
        let log = fs::read_to_string(dir.path().join("system.log")).unwrap();
        assert_eq!(log.lines().last(), Some("=== Logging server shutdown ==="));
    }

    #[test]
    fn test_missing_logging_service_is_a_warning() {
        let cluster = Cluster::start();
        let mut endpoints = cluster.endpoints();
        endpoints.logging = Endpoint::new("127.0.0.1", 1);

        let retry = RetryCoordinator::new(ShutdownContext::new(), 1);
        let mut session = ClientSession::connect(&endpoints, retry, Box::new(NoRetry));
        assert!(!session.is_connected(ServiceKind::Logging));

        // Login itself goes through the logging service.
        assert!(matches!(session.login(2), Err(ServiceError::NotConnected { .. })));

        drop(session);
        cluster.stop();
    }

    #[test]
    fn test_client_shutdown_sends_quit_everywhere() {
        let cluster = Cluster::start();
        let mut session = cluster.session();

        let status = session.server_status();
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|entry| entry.active));

        let report = session.shutdown();
        let kinds: Vec<ServiceKind> = report.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(kinds, ServiceKind::ALL.to_vec());
        assert!(report.iter().all(|(_, result)| result.is_ok()));
        assert!(session.server_status().iter().all(|entry| !entry.active));

        assert!(session.shutdown().is_empty());
        assert!(matches!(session.deposit(1.0), Err(ServiceError::NotLoggedIn)));

        drop(session);
        let (_, counts) = cluster.stop();
        assert_eq!(counts, [1, 1, 1]);
    }

    #[test]
    fn test_service_shutdown_with_idle_client_connected() {
        let cluster = Cluster::start();
        let mut session = cluster.session();
        session.login(6).unwrap();
        session.deposit(5.0).unwrap();

        // Services close idle connections and stop without the client quitting.
        let (_, counts) = cluster.stop();
        assert_eq!(counts, [1, 1, 1]);

        assert!(session.balance().is_err());
    }
}
