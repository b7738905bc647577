#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;

use idqp_core::domain::{Dataset, Incident, IncidentFilter, NewRule, Rule, RuleParams, Severity};
use idqp_core::error::{AppError, ErrorKind};
use idqp_client::api::QualityApi;
use parking_lot::Mutex;

// ---------------------------------------------------------------------------------------------
// Fake HTTP backend
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    /// Path including any query string.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or("")
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            body: value.to_string(),
        }
    }

    pub fn ok(value: serde_json::Value) -> Self {
        Self::json(200, value)
    }

    pub fn detail(status: u16, detail: &str) -> Self {
        Self::json(status, serde_json::json!({ "detail": detail }))
    }
}

type Handler = dyn Fn(&Recorded) -> Reply + Send + Sync;

/// HTTP/1.1 server on an ephemeral port. Every connection carries one request and is closed
/// after the reply.
pub struct TestServer {
    pub url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl TestServer {
    pub fn start(handler: impl Fn(&Recorded) -> Reply + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let log = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let log = log.clone();
                let handler = handler.clone();
                thread::spawn(move || serve(stream, &*handler, &log));
            }
        });

        Self { url, requests }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

fn serve(stream: TcpStream, handler: &Handler, log: &Mutex<Vec<Recorded>>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).unwrap_or(0) == 0 {
        return;
    }
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    loop {
        let mut h = String::new();
        if reader.read_line(&mut h).unwrap_or(0) == 0 {
            break;
        }
        let h = h.trim_end();
        if h.is_empty() {
            break;
        }
        if let Some((k, v)) = h.split_once(':') {
            headers.push((k.trim().to_string(), v.trim().to_string()));
        }
    }

    let len = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; len];
    if len > 0 && reader.read_exact(&mut body).is_err() {
        return;
    }

    let req = Recorded {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    let reply = handler(&req);
    log.lock().push(req);

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.status,
        reason(reply.status),
        reply.body.len(),
        reply.body
    );
    let mut stream = reader.into_inner();
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

// ---------------------------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------------------------

pub fn dataset(id: i64, name: &str) -> Dataset {
    Dataset {
        id,
        name: name.to_string(),
        description: None,
        owner_id: 1,
        created_at: "2024-05-01T09:00:00".to_string(),
    }
}

pub fn rule(id: i64, dataset_id: i64, severity: Severity) -> Rule {
    let mut params = RuleParams::new();
    params.insert("column".to_string(), serde_json::json!("email"));
    Rule {
        id,
        dataset_id,
        rule_type: idqp_core::domain::RuleType::Completeness,
        params,
        threshold: 0.1,
        severity,
        enabled: true,
        created_at: "2024-05-01T09:05:00".to_string(),
    }
}

pub fn incident(id: i64, dataset_id: i64, severity: Severity, acknowledged: bool) -> Incident {
    Incident {
        id,
        dataset_id,
        rule_id: 1,
        created_at: "2024-05-02T10:00:00".to_string(),
        metric_value: 0.25,
        passed: false,
        severity,
        description: format!("incident {id}"),
        acknowledged,
    }
}

pub fn incident_json(id: i64, acknowledged: bool) -> serde_json::Value {
    serde_json::to_value(incident(id, 1, Severity::Warning, acknowledged)).unwrap()
}

// ---------------------------------------------------------------------------------------------
// In-process backend for controller tests
// ---------------------------------------------------------------------------------------------

struct AckGate {
    id: i64,
    entered: Sender<i64>,
    release: Receiver<()>,
}

struct ListGate {
    entered: Sender<()>,
    release: Receiver<()>,
    outcome: AppError,
}

/// `QualityApi` over in-memory collections, with a call log and per-incident failure hooks.
#[derive(Default)]
pub struct ScriptedApi {
    pub datasets: Mutex<Vec<Dataset>>,
    pub rules: Mutex<Vec<Rule>>,
    pub incidents: Mutex<Vec<Incident>>,
    pub ack_failures: Mutex<HashMap<i64, AppError>>,
    pub list_failure: Mutex<Option<AppError>>,
    /// Serve every incident page from offset 0, like a backend that drops the parameter.
    pub ignore_offset: Mutex<bool>,
    calls: Mutex<Vec<String>>,
    gate: Mutex<Option<AckGate>>,
    list_gate: Mutex<Option<ListGate>>,
}

impl ScriptedApi {
    pub fn new(datasets: Vec<Dataset>, rules: Vec<Rule>, incidents: Vec<Incident>) -> Arc<Self> {
        Arc::new(Self {
            datasets: Mutex::new(datasets),
            rules: Mutex::new(rules),
            incidents: Mutex::new(incidents),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == op).count()
    }

    /// Block the next acknowledgement of `id` until the returned sender fires. The receiver
    /// yields once the call has reached the backend.
    pub fn hold_acknowledge(&self, id: i64) -> (Receiver<i64>, Sender<()>) {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        *self.gate.lock() = Some(AckGate {
            id,
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }

    /// Block the next incident listing until the returned sender fires, then fail it with
    /// `outcome`. Listings issued meanwhile are served normally.
    pub fn hold_list_failure(&self, outcome: AppError) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        *self.list_gate.lock() = Some(ListGate {
            entered: entered_tx,
            release: release_rx,
            outcome,
        });
        (entered_rx, release_tx)
    }

    fn record(&self, op: &str) {
        self.calls.lock().push(op.to_string());
    }

    fn not_found(what: &str) -> AppError {
        AppError::new(ErrorKind::NotFound, "HTTP_NOT_FOUND", format!("{what} not found"))
    }
}

impl QualityApi for ScriptedApi {
    fn list_datasets(&self) -> Result<Vec<Dataset>, AppError> {
        self.record("list_datasets");
        Ok(self.datasets.lock().clone())
    }

    fn get_dataset(&self, id: i64) -> Result<Dataset, AppError> {
        self.record("get_dataset");
        self.datasets
            .lock()
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| Self::not_found("dataset"))
    }

    fn list_rules(&self, dataset_id: Option<i64>) -> Result<Vec<Rule>, AppError> {
        self.record("list_rules");
        Ok(self
            .rules
            .lock()
            .iter()
            .filter(|r| dataset_id.map_or(true, |d| r.dataset_id == d))
            .cloned()
            .collect())
    }

    fn get_rule(&self, id: i64) -> Result<Rule, AppError> {
        self.record("get_rule");
        self.rules
            .lock()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| Self::not_found("rule"))
    }

    fn create_rule(&self, input: &NewRule) -> Result<Rule, AppError> {
        self.record("create_rule");
        let mut rules = self.rules.lock();
        let id = rules.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let rule = Rule {
            id,
            dataset_id: input.dataset_id,
            rule_type: input.rule_type,
            params: input.params.clone(),
            threshold: input.threshold,
            severity: input.severity,
            enabled: input.enabled,
            created_at: "2024-05-03T08:00:00".to_string(),
        };
        rules.push(rule.clone());
        Ok(rule)
    }

    fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, AppError> {
        self.record("list_incidents");
        let gate = self.list_gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
            return Err(gate.outcome);
        }
        if let Some(err) = self.list_failure.lock().clone() {
            return Err(err);
        }
        let offset = if *self.ignore_offset.lock() {
            0
        } else {
            filter.offset.unwrap_or(0) as usize
        };
        let limit = filter.limit.unwrap_or(50) as usize;
        Ok(self
            .incidents
            .lock()
            .iter()
            .filter(|i| filter.dataset_id.map_or(true, |d| i.dataset_id == d))
            .filter(|i| filter.rule_id.map_or(true, |r| i.rule_id == r))
            .filter(|i| filter.acknowledged.map_or(true, |a| i.acknowledged == a))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn get_incident(&self, id: i64) -> Result<Incident, AppError> {
        self.record("get_incident");
        self.incidents
            .lock()
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| Self::not_found("incident"))
    }

    fn acknowledge_incident(&self, id: i64, _comment: Option<&str>) -> Result<Incident, AppError> {
        self.record("acknowledge_incident");

        let gate = {
            let mut slot = self.gate.lock();
            if slot.as_ref().is_some_and(|g| g.id == id) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(gate) = gate {
            let _ = gate.entered.send(id);
            let _ = gate.release.recv();
        }

        if let Some(err) = self.ack_failures.lock().get(&id).cloned() {
            return Err(err);
        }
        let mut incidents = self.incidents.lock();
        let inc = incidents
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| Self::not_found("incident"))?;
        if inc.acknowledged {
            return Err(AppError::new(ErrorKind::Conflict, "HTTP_CONFLICT", "Incident already acknowledged"));
        }
        inc.acknowledged = true;
        Ok(inc.clone())
    }
}
