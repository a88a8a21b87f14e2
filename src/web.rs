use colored::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::admin::{Admin, ControlRequest, TopicRequest};
use crate::chat::ChatService;
use crate::completion::Completer;
use crate::error::{ChatError, Result};
use crate::hub::Hub;
use crate::lounge::{delay_for_speed, Lounge, LoungeScheduler};
use crate::store::Store;

/// Largest request (head plus body) the server will buffer.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;
/// Pause between peeks while a request head is still arriving.
const PEEK_BACKOFF: Duration = Duration::from_millis(10);
/// Give up on a head that never completes.
const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Default and maximum page size for `GET /api/messages`.
pub const DEFAULT_PAGE: usize = 100;
pub const MAX_PAGE: usize = 500;

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="es">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>INTELICHAT</title>
<style>
  :root { --fg:#00ff00; --dim:#007700; --bg:#000; --panel:#050805; }
  * { box-sizing:border-box; }
  body { margin:0; background:var(--bg); color:var(--fg); font:14px/1.4 "Courier New",monospace; }
  body::after { content:""; position:fixed; inset:0; pointer-events:none;
    background:repeating-linear-gradient(0deg,rgba(0,0,0,.25) 0 1px,transparent 1px 3px); }
  h1 { margin:0; font-size:18px; letter-spacing:3px; text-shadow:0 0 6px var(--fg); }
  button, input, select { background:var(--bg); color:var(--fg); border:1px solid var(--fg); font:inherit; padding:4px 8px; }
  button:hover { background:var(--fg); color:var(--bg); cursor:pointer; }
  header { display:flex; justify-content:space-between; align-items:center; padding:8px 12px; border-bottom:1px solid var(--dim); }
  #login { max-width:420px; margin:15vh auto; border:1px solid var(--fg); padding:24px; }
  #login p { color:var(--dim); }
  #login-err { color:#ff5555; min-height:1.4em; }
  #app { display:grid; grid-template-columns:1fr 240px; height:calc(100vh - 42px); }
  #main { display:flex; flex-direction:column; min-width:0; }
  #tabs { display:flex; gap:4px; padding:6px 12px; border-bottom:1px solid var(--dim); }
  #tabs button.active { background:var(--fg); color:var(--bg); }
  #log { flex:1; overflow-y:auto; padding:8px 12px; white-space:pre-wrap; word-break:break-word; }
  .msg .ts { color:var(--dim); }
  .msg.ai .body { color:#c0ffc0; }
  .msg.system, .notice { color:#888; font-style:italic; }
  #composer { display:flex; gap:6px; padding:8px 12px; border-top:1px solid var(--dim); }
  #composer input { flex:1; }
  #help { padding:0 12px 8px; color:var(--dim); font-size:12px; }
  aside { border-left:1px solid var(--dim); padding:8px; overflow-y:auto; background:var(--panel); }
  aside h2 { font-size:13px; margin:8px 0 4px; border-bottom:1px dashed var(--dim); }
  #online div { padding:1px 0; }
  #admin label { display:block; }
  #admin .row { display:flex; gap:4px; flex-wrap:wrap; margin:4px 0; }
  #status { color:var(--dim); font-size:12px; white-space:pre-line; }
  .cursor::after { content:"_"; animation:blink 1s steps(1) infinite; }
  @keyframes blink { 50% { opacity:0; } }
</style>
</head>
<body>
<header>
  <h1 class="cursor">INTELICHAT</h1>
  <span id="whoami"></span>
</header>

<section id="login">
  <p>&gt; SISTEMA DE CHAT RETRO v3.0</p>
  <p>&gt; Introduce tu nombre de usuario para conectar.</p>
  <form id="login-form">
    <input id="username" maxlength="24" autocomplete="off" autofocus placeholder="usuario">
    <button type="submit">CONECTAR</button>
  </form>
  <div id="login-err"></div>
</section>

<section id="app" hidden>
  <div id="main">
    <nav id="tabs"></nav>
    <div id="log"></div>
    <form id="composer">
      <input id="text" maxlength="2000" autocomplete="off" placeholder="Escribe un mensaje... (@neo, @latamara, ...)">
      <button type="submit">ENVIAR</button>
    </form>
    <div id="help">
      @neo futuro &middot; @latamara barrio &middot; @barrilinter culto &middot;
      @laconchita abuela &middot; @marktukemberg dev &middot; @robertthecoach coach
    </div>
  </div>
  <aside>
    <h2>EN LÍNEA</h2>
    <div id="online"></div>
    <h2>IA LOUNGE</h2>
    <div id="status">-</div>
    <div id="admin" hidden>
      <h2>CONTROL</h2>
      <div class="row">
        <button data-action="start">START</button>
        <button data-action="pause">PAUSA</button>
        <button data-action="resume">SEGUIR</button>
        <button data-action="stop">STOP</button>
      </div>
      <div class="row">
        <select id="topics"></select>
        <button id="set-topic">TEMA</button>
      </div>
      <div class="row">
        <select id="speed">
          <option value="1">lento</option>
          <option value="2">normal</option>
          <option value="3">rápido</option>
        </select>
        <button id="set-speed">VELOCIDAD</button>
      </div>
      <div id="agents"></div>
      <div class="row">
        <button id="toggle">AGENTES</button>
        <button id="tick">TURNO</button>
        <button data-action="clear_chat">LIMPIAR</button>
      </div>
    </div>
  </aside>
</section>

<script>
const AGENTS = ['NEO','LATAMARA','BARRILINTER','LACONCHITA','MARKTUKEMBERG','ROBERTTHECOACH'];
const $ = id => document.getElementById(id);
let me = null, room = null, ws = null;

async function api(method, path, body) {
  const res = await fetch(path, {
    method,
    headers: { 'Content-Type': 'application/json' },
    body: body === undefined ? undefined : JSON.stringify(body),
  });
  const data = await res.json().catch(() => ({}));
  if (!res.ok) throw new Error(data.error || ('HTTP ' + res.status));
  return data;
}

function time(ms) {
  return new Date(ms).toLocaleTimeString('es-ES', { hour:'2-digit', minute:'2-digit' });
}

function line(cls, build) {
  const log = $('log');
  const stick = log.scrollTop + log.clientHeight >= log.scrollHeight - 20;
  const d = document.createElement('div');
  d.className = cls;
  build(d);
  log.appendChild(d);
  if (stick) log.scrollTop = log.scrollHeight;
}

function addMessage(m) {
  line('msg ' + m.kind, d => {
    const ts = document.createElement('span');
    ts.className = 'ts';
    ts.textContent = '[' + time(m.created_at_ms) + '] ';
    const who = document.createElement('span');
    who.style.color = m.avatar_color;
    who.textContent = m.username;
    const body = document.createElement('span');
    body.className = 'body';
    body.textContent = ': ' + m.body;
    d.append(ts, who, body);
  });
}

function notice(text) {
  line('notice', d => { d.textContent = '*** ' + text; });
}

function renderOnline(users) {
  const box = $('online');
  box.innerHTML = '';
  users.forEach(u => {
    const d = document.createElement('div');
    d.style.color = u.avatar_color;
    d.textContent = (u.is_ai ? '◆ ' : '● ') + u.username + (u.is_admin ? ' [admin]' : '');
    box.appendChild(d);
  });
}

function renderStatus(s) {
  const on = AGENTS.filter(a => s.enabled[a]);
  $('status').textContent =
    (s.is_active ? 'ACTIVA' : 'PARADA') + ' · velocidad ' + s.speed +
    '\ntema: ' + s.current_topic +
    '\nagentes: ' + (on.join(', ') || 'ninguno') +
    (s.last_speaker ? '\núltimo: ' + s.last_speaker : '');
  $('speed').value = String(s.speed);
  AGENTS.forEach(a => { const c = $('agent-' + a); if (c) c.checked = !!s.enabled[a]; });
}

function handle(ev) {
  switch (ev.type) {
    case 'welcome':
      $('log').innerHTML = '';
      ev.messages.forEach(addMessage);
      renderOnline(ev.online);
      break;
    case 'message':
      if (room && ev.message.room_id === room.id) addMessage(ev.message);
      break;
    case 'messages_cleared':
      if (room && ev.room_id === room.id) { $('log').innerHTML = ''; notice('Chat limpiado'); }
      break;
    case 'presence':
      notice(ev.notice);
      api('GET', '/api/users/online').then(j => renderOnline(j.users)).catch(() => {});
      break;
    case 'status':
      renderStatus(ev.status);
      break;
  }
}

function join(r) {
  room = r;
  if (ws) { ws.onclose = null; ws.close(); }
  document.querySelectorAll('#tabs button').forEach(b => b.classList.toggle('active', b.dataset.id === r.id));
  const proto = location.protocol === 'https:' ? 'wss' : 'ws';
  ws = new WebSocket(proto + '://' + location.host + '/ws/' + r.id);
  ws.onmessage = e => handle(JSON.parse(e.data));
  ws.onclose = () => setTimeout(() => { if (room === r) join(r); }, 2000);
}

async function loadRooms() {
  const { rooms } = await api('GET', '/api/rooms');
  const tabs = $('tabs');
  tabs.innerHTML = '';
  rooms.forEach(r => {
    const b = document.createElement('button');
    b.textContent = '#' + r.name;
    b.dataset.id = r.id;
    b.onclick = () => join(r);
    tabs.appendChild(b);
  });
  if (rooms.length) join(rooms[0]);
}

async function loadLounge() {
  const s = await api('GET', '/api/ai-conversation');
  $('status').textContent = (s.active ? 'ACTIVA' : 'PARADA') + ' · velocidad ' + s.speed + '\ntema: ' + (s.current_topic || '-');
  if (!me.is_admin) return;
  const o = await api('GET', '/api/admin/ai-control');
  renderStatus(o.status);
  const sel = $('topics');
  sel.innerHTML = '';
  o.topics.forEach(t => {
    const opt = document.createElement('option');
    opt.value = t.initial_prompt;
    opt.textContent = '[' + t.category + '] ' + t.title;
    sel.appendChild(opt);
  });
}

async function control(action, extra) {
  try {
    const body = Object.assign({ userId: me.id, action }, extra || {});
    await api('POST', '/api/admin/ai-control', body);
  } catch (e) { notice('ERROR: ' + e.message); }
}

$('login-form').onsubmit = async e => {
  e.preventDefault();
  const username = $('username').value.trim();
  if (!username) return;
  try {
    me = (await api('POST', '/api/login', { username })).user;
  } catch (err) {
    $('login-err').textContent = err.message;
    return;
  }
  $('login').hidden = true;
  $('app').hidden = false;
  $('whoami').textContent = me.username + (me.is_admin ? ' [admin]' : '');
  $('admin').hidden = !me.is_admin;
  setInterval(() => api('POST', '/api/heartbeat', { userId: me.id }).catch(() => {}), 30000);
  await loadRooms();
  loadLounge().catch(() => {});
};

$('composer').onsubmit = async e => {
  e.preventDefault();
  const content = $('text').value.trim();
  if (!content || !room) return;
  $('text').value = '';
  try {
    await api('POST', '/api/messages', { userId: me.id, roomId: room.id, content });
  } catch (err) { notice('ERROR: ' + err.message); }
};

AGENTS.forEach(a => {
  const l = document.createElement('label');
  l.innerHTML = '<input type="checkbox" id="agent-' + a + '" checked> ' + a;
  $('agents').appendChild(l);
});
document.querySelectorAll('[data-action]').forEach(b => {
  b.onclick = () => control(b.dataset.action, b.dataset.action === 'start' ? { topic: $('topics').value } : {});
});
$('set-topic').onclick = () => control('set_topic', { topic: $('topics').value });
$('set-speed').onclick = () => control('set_speed', { speed: Number($('speed').value) });
$('toggle').onclick = () => {
  const flags = {};
  AGENTS.forEach(a => { flags[a.toLowerCase() + '_enabled'] = $('agent-' + a).checked; });
  control('toggle_agents', flags);
};
$('tick').onclick = () => api('POST', '/api/ai-conversation').catch(e => notice('ERROR: ' + e.message));

window.addEventListener('beforeunload', () => {
  if (me) navigator.sendBeacon('/api/user/offline', JSON.stringify({ userId: me.id }));
});
</script>
</body>
</html>"##;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Everything a connection handler needs.
pub struct AppState {
    pub store: Arc<Store>,
    pub hub: Hub,
    pub chat: Arc<ChatService>,
    pub lounge: Arc<Lounge>,
    pub admin: Admin,
}

impl AppState {
    /// Wire the services around one store, hub and completer.
    pub fn new(store: Arc<Store>, completer: Arc<dyn Completer>, model: &str) -> Self {
        let hub = Hub::new();
        let chat = Arc::new(ChatService::new(Arc::clone(&store), hub.clone(), Arc::clone(&completer), model));
        let lounge = Arc::new(Lounge::new(Arc::clone(&store), completer, hub.clone(), model));
        let scheduler = Arc::new(LoungeScheduler::new(Arc::clone(&lounge)));
        let admin = Admin::new(Arc::clone(&store), hub.clone(), scheduler);
        Self { store, hub, chat, lounge, admin }
    }

    pub fn scheduler(&self) -> &Arc<LoungeScheduler> {
        self.admin.scheduler()
    }
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// Parsed request line and the headers the router cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub content_length: usize,
    pub websocket: bool,
    /// Bytes taken by the request line and headers.
    pub head_len: usize,
}

/// Parse the head of an HTTP/1.1 request. `Ok(None)` means more bytes are
/// needed.
pub fn parse_head(buf: &[u8]) -> Result<Option<RequestHead>> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    let head_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(ChatError::BadRequest(format!("malformed request: {}", e))),
    };

    let mut content_length = 0;
    let mut websocket = false;
    for h in req.headers.iter() {
        if h.name.eq_ignore_ascii_case("content-length") {
            content_length = std::str::from_utf8(h.value)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| ChatError::BadRequest("invalid Content-Length".into()))?;
        } else if h.name.eq_ignore_ascii_case("upgrade") {
            websocket = h.value.eq_ignore_ascii_case(b"websocket");
        }
    }

    Ok(Some(RequestHead {
        method: req.method.unwrap_or("GET").to_string(),
        target: req.path.unwrap_or("/").to_string(),
        content_length,
        websocket,
        head_len,
    }))
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: &str, target: &str, body: Vec<u8>) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, parse_query(q)),
            None => (target, HashMap::new()),
        };
        Self { method: method.to_ascii_uppercase(), path: path.to_string(), query, body }
    }

    pub fn get(target: &str) -> Self {
        Self::new("GET", target, Vec::new())
    }

    pub fn json(method: &str, target: &str, body: &Value) -> Self {
        Self::new(method, target, body.to_string().into_bytes())
    }

    fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Err(ChatError::BadRequest("request body required".into()));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    pub fn json(status: u16, value: Value) -> Self {
        Self { status, content_type: "application/json", body: value.to_string() }
    }

    pub fn html(body: &str) -> Self {
        Self { status: 200, content_type: "text/html; charset=utf-8", body: body.to_string() }
    }

    pub fn error(err: &ChatError) -> Self {
        Self::json(err.status_code(), json!({ "error": err.to_string() }))
    }

    /// Body parsed back as JSON; `Null` for non-JSON bodies.
    pub fn json_body(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }

    pub fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, PUT, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nConnection: close\r\n\r\n{}",
            self.status,
            reason(self.status),
            self.content_type,
            self.body.len(),
            self.body,
        )
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        _ => "Internal Server Error",
    }
}

/// Percent-decode a query component. `+` is a space; invalid escapes are
/// kept literally and invalid UTF-8 is replaced.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse query string into key-value pairs. Later duplicates win.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let val = parts.next().unwrap_or("");
            Some((url_decode(key), url_decode(val)))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct LoginBody {
    username: String,
}

#[derive(Deserialize)]
struct UserBody {
    #[serde(rename = "userId")]
    user_id: String,
}

#[derive(Deserialize)]
struct PostMessageBody {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "roomId")]
    room_id: String,
    content: String,
}

/// Dispatch one request. Errors become `{"error": ...}` bodies.
pub async fn route(state: &AppState, req: HttpRequest) -> Response {
    if req.method == "OPTIONS" {
        return Response { status: 204, content_type: "text/plain", body: String::new() };
    }
    match dispatch(state, &req).await {
        Ok(resp) => resp,
        Err(err) => {
            if err.status_code() >= 500 {
                warn!(%err, method = %req.method, path = %req.path, "request failed");
            } else {
                debug!(%err, method = %req.method, path = %req.path, "request rejected");
            }
            Response::error(&err)
        }
    }
}

async fn dispatch(state: &AppState, req: &HttpRequest) -> Result<Response> {
    let method = req.method.as_str();
    match (method, req.path.as_str()) {
        ("GET", "/") | ("GET", "/index.html") => Ok(Response::html(INDEX_HTML)),

        ("POST", "/api/login") => {
            let body: LoginBody = req.parse_json()?;
            let user = state.chat.login(&body.username)?;
            Ok(Response::json(200, json!({ "user": user })))
        }
        ("POST", "/api/heartbeat") => {
            let body: UserBody = req.parse_json()?;
            state.chat.heartbeat(&body.user_id)?;
            Ok(Response::json(200, json!({ "success": true })))
        }
        ("POST", "/api/user/offline") => {
            let body: UserBody = req.parse_json()?;
            let user = state.chat.logout(&body.user_id)?;
            Ok(Response::json(200, json!({ "success": true, "user": user })))
        }
        ("GET", "/api/users/online") => {
            Ok(Response::json(200, json!({ "users": state.store.online_users()? })))
        }
        ("GET", "/api/rooms") => Ok(Response::json(200, json!({ "rooms": state.store.rooms()? }))),

        ("GET", "/api/messages") => {
            let room_id = req
                .query
                .get("room")
                .filter(|r| !r.is_empty())
                .ok_or_else(|| ChatError::BadRequest("room required".into()))?;
            let limit = match req.query.get("limit") {
                Some(raw) => raw
                    .parse::<usize>()
                    .map_err(|_| ChatError::BadRequest(format!("invalid limit '{}'", raw)))?,
                None => DEFAULT_PAGE,
            };
            state.store.room(room_id)?;
            let messages = state.store.messages(room_id, Some(limit.min(MAX_PAGE)))?;
            Ok(Response::json(200, json!({ "messages": messages })))
        }
        ("POST", "/api/messages") => {
            let body: PostMessageBody = req.parse_json()?;
            let posted = state.chat.send_message(&body.user_id, &body.room_id, &body.content)?;
            Ok(Response::json(
                201,
                json!({ "message": posted.message, "summoned": posted.summoned }),
            ))
        }

        ("GET", "/api/ai-conversation") => {
            let status = state.store.conversation_status()?;
            let room = state.store.lounge_room()?;
            Ok(Response::json(
                200,
                json!({
                    "active": status.is_active,
                    "room_id": room.id,
                    "current_topic": status.current_topic,
                    "speed": status.speed,
                    "last_speaker": status.last_speaker,
                    "scheduler_running": state.scheduler().is_running(),
                }),
            ))
        }
        ("POST", "/api/ai-conversation") => {
            let outcome = state.lounge.tick().await;
            let speed = state.store.conversation_status().map(|s| s.speed).unwrap_or(2);
            let mut body = serde_json::to_value(&outcome)?;
            if let Value::Object(map) = &mut body {
                map.insert("next_delay_ms".into(), json!(delay_for_speed(speed).as_millis() as u64));
            }
            Ok(Response::json(200, body))
        }

        ("GET", "/api/admin/ai-control") => Ok(Response::json(200, serde_json::to_value(state.admin.overview()?)?)),
        ("POST", "/api/admin/ai-control") => {
            let body: ControlRequest = req.parse_json()?;
            let outcome = state.admin.control(&body)?;
            Ok(Response::json(200, serde_json::to_value(outcome)?))
        }
        ("PUT", "/api/admin/ai-control") => {
            let body: TopicRequest = req.parse_json()?;
            let topic = state.admin.create_topic(&body)?;
            Ok(Response::json(201, json!({ "success": true, "topic": topic })))
        }

        (_, path) if is_known_path(path) => Ok(Response::json(
            405,
            json!({ "error": format!("method {} not allowed on {}", method, path) }),
        )),
        (_, path) => Err(ChatError::NotFound(format!("route '{}'", path))),
    }
}

fn is_known_path(path: &str) -> bool {
    matches!(
        path,
        "/" | "/index.html"
            | "/api/login"
            | "/api/heartbeat"
            | "/api/user/offline"
            | "/api/users/online"
            | "/api/rooms"
            | "/api/messages"
            | "/api/ai-conversation"
            | "/api/admin/ai-control"
    )
}

// ---------------------------------------------------------------------------
// Server loop
// ---------------------------------------------------------------------------

/// Accept connections forever.
pub async fn serve(bind: &str, port: u16, state: Arc<AppState>, open_browser: bool) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("{}:{}", bind, port)).await?;
    let url = format!("http://localhost:{}", listener.local_addr()?.port());

    eprintln!("{}", format!("  INTELICHAT running at {}", url).bright_green());
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());
    info!(%bind, port, "listening");

    if open_browser {
        #[cfg(target_os = "windows")]
        {
            let _ = std::process::Command::new("cmd").args(["/C", &format!("start {}", url)]).spawn();
        }
        #[cfg(target_os = "macos")]
        {
            let _ = std::process::Command::new("open").arg(&url).spawn();
        }
        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("xdg-open").arg(&url).spawn();
        }
    }

    loop {
        let (stream, addr) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                debug!(%addr, error = %e, "connection error");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) -> Result<()> {
    // Peek at the head to route WebSocket upgrades before consuming anything.
    let peeked = tokio::time::timeout(HEAD_TIMEOUT, peek_head(&stream)).await.ok().flatten();
    if let Some(head) = peeked {
        if head.websocket {
            if let Some(room_id) = head.target.strip_prefix("/ws/") {
                let room_id = url_decode(room_id.split('?').next().unwrap_or(""));
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws_stream) => {
                        crate::hub::handle_ws(ws_stream, state.hub.clone(), Arc::clone(&state.store), room_id).await;
                    }
                    Err(e) => warn!(error = %e, "ws handshake failed"),
                }
                return Ok(());
            }
        }
    }

    let response = match read_request(&mut stream).await {
        Ok(Some(req)) => route(&state, req).await,
        Ok(None) => return Ok(()),
        Err(err) => Response::error(&err),
    };
    stream.write_all(response.to_http().as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Peek until the request head is complete without consuming it. `None` if
/// the peer closed, the head is malformed, or it outgrows
/// [`MAX_REQUEST_BYTES`].
async fn peek_head(stream: &TcpStream) -> Option<RequestHead> {
    let mut buf = vec![0u8; 4096];
    let mut seen = 0;
    loop {
        let n = stream.peek(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        match parse_head(&buf[..n]) {
            Ok(Some(head)) => return Some(head),
            Err(_) => return None,
            Ok(None) if n == buf.len() => {
                if buf.len() >= MAX_REQUEST_BYTES {
                    return None;
                }
                let grown = (buf.len() * 2).min(MAX_REQUEST_BYTES);
                buf.resize(grown, 0);
            }
            Ok(None) if n == seen => {
                // Nothing new buffered yet; wait for the next segment.
                stream.readable().await.ok()?;
                tokio::time::sleep(PEEK_BACKOFF).await;
            }
            Ok(None) => {}
        }
        seen = n;
    }
}

async fn read_request(stream: &mut TcpStream) -> Result<Option<HttpRequest>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(head) = parse_head(&buf)? {
            let total = match head.head_len.checked_add(head.content_length) {
                Some(total) if total <= MAX_REQUEST_BYTES => total,
                _ => return Err(ChatError::BadRequest("request too large".into())),
            };
            while buf.len() < total {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(ChatError::BadRequest("request body truncated".into()));
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let body = buf[head.head_len..total].to_vec();
            return Ok(Some(HttpRequest::new(&head.method, &head.target, body)));
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(ChatError::BadRequest("request head too large".into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedCompleter;

    fn state() -> AppState {
        let store = Arc::new(Store::open_in_memory().unwrap());
        AppState::new(store, Arc::new(ScriptedCompleter::always("Correcto.")), "m")
    }

    // -- url_decode / parse_query ---------------------------------------------

    #[test]
    fn test_url_decode_basic() {
        assert_eq!(url_decode("hola+mundo"), "hola mundo");
        assert_eq!(url_decode("a%20b"), "a b");
        assert_eq!(url_decode(""), "");
    }

    #[test]
    fn test_url_decode_utf8() {
        assert_eq!(url_decode("espa%C3%B1a"), "españa");
        assert_eq!(url_decode("%F0%9F%9F%A2"), "🟢");
    }

    #[test]
    fn test_url_decode_bad_escapes_are_literal() {
        assert_eq!(url_decode("100%"), "100%");
        assert_eq!(url_decode("%zz"), "%zz");
        assert_eq!(url_decode("%4"), "%4");
    }

    #[test]
    fn test_parse_query() {
        let q = parse_query("room=abc&limit=20&name=Jos%C3%A9");
        assert_eq!(q["room"], "abc");
        assert_eq!(q["limit"], "20");
        assert_eq!(q["name"], "José");
        assert!(parse_query("").is_empty());
        assert_eq!(parse_query("flag")["flag"], "");
        assert_eq!(parse_query("a=1&a=2")["a"], "2");
    }

    // -- parse_head -----------------------------------------------------------

    #[test]
    fn test_parse_head_partial() {
        assert_eq!(parse_head(b"GET / HTTP/1.1\r\nHost: x\r\n").unwrap(), None);
    }

    #[test]
    fn test_parse_head_content_length() {
        let raw = b"POST /api/login HTTP/1.1\r\nHost: x\r\ncontent-length: 20\r\n\r\n{\"username\":\"ana\"}";
        let head = parse_head(raw).unwrap().unwrap();
        assert_eq!(head.method, "POST");
        assert_eq!(head.target, "/api/login");
        assert_eq!(head.content_length, 20);
        assert!(!head.websocket);
        assert_eq!(&raw[head.head_len..head.head_len + 3], b"{\"u");
    }

    #[test]
    fn test_parse_head_websocket() {
        let raw = b"GET /ws/room-1 HTTP/1.1\r\nHost: x\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\n\r\n";
        let head = parse_head(raw).unwrap().unwrap();
        assert!(head.websocket);
        assert_eq!(head.target, "/ws/room-1");
    }

    #[test]
    fn test_parse_head_rejects_garbage() {
        assert!(matches!(parse_head(b"\x00\x01 nonsense\r\n\r\n"), Err(ChatError::BadRequest(_))));
        assert!(parse_head(b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n").is_err());
    }

    #[test]
    fn test_http_request_splits_query() {
        let req = HttpRequest::get("/api/messages?room=r1&limit=5");
        assert_eq!(req.path, "/api/messages");
        assert_eq!(req.query["room"], "r1");
    }

    #[test]
    fn test_response_to_http() {
        let r = Response::json(404, json!({"error": "x"}));
        let http = r.to_http();
        assert!(http.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(http.contains("Content-Type: application/json\r\n"));
        assert!(http.contains(&format!("Content-Length: {}\r\n", r.body.len())));
        assert!(http.ends_with("\r\n\r\n{\"error\":\"x\"}"));
    }

    // -- index ----------------------------------------------------------------

    #[test]
    fn test_index_html_basics() {
        assert!(INDEX_HTML.starts_with("<!DOCTYPE html>"));
        assert!(INDEX_HTML.contains("<title>INTELICHAT</title>"));
        assert!(INDEX_HTML.contains("'/ws/'"));
        assert!(INDEX_HTML.contains("/api/heartbeat"));
        for handle in ["@neo", "@latamara", "@barrilinter", "@laconchita", "@marktukemberg", "@robertthecoach"] {
            assert!(INDEX_HTML.contains(handle), "missing {}", handle);
        }
    }

    #[test]
    fn test_index_html_no_external_deps() {
        assert!(!INDEX_HTML.contains("<script src"));
        assert!(!INDEX_HTML.contains("<link rel=\"stylesheet\""));
    }

    // -- routes ---------------------------------------------------------------

    #[tokio::test]
    async fn test_route_index() {
        let resp = route(&state(), HttpRequest::get("/")).await;
        assert_eq!(resp.status, 200);
        assert!(resp.content_type.starts_with("text/html"));
    }

    #[tokio::test]
    async fn test_route_unknown_and_wrong_method() {
        let s = state();
        assert_eq!(route(&s, HttpRequest::get("/nope")).await.status, 404);
        assert_eq!(route(&s, HttpRequest::get("/api/login")).await.status, 405);
        assert_eq!(route(&s, HttpRequest::new("OPTIONS", "/api/login", vec![])).await.status, 204);
    }

    #[tokio::test]
    async fn test_route_login_and_bad_bodies() {
        let s = state();
        let ok = route(&s, HttpRequest::json("POST", "/api/login", &json!({"username": "ana"}))).await;
        assert_eq!(ok.status, 200);
        assert_eq!(ok.json_body()["user"]["username"], "ana");

        let empty = route(&s, HttpRequest::new("POST", "/api/login", vec![])).await;
        assert_eq!(empty.status, 400);
        let garbage = route(&s, HttpRequest::new("POST", "/api/login", b"{oops".to_vec())).await;
        assert_eq!(garbage.status, 400);
        assert!(garbage.json_body()["error"].is_string());
    }

    #[tokio::test]
    async fn test_route_messages_requires_room() {
        let s = state();
        assert_eq!(route(&s, HttpRequest::get("/api/messages")).await.status, 400);
        assert_eq!(route(&s, HttpRequest::get("/api/messages?room=missing")).await.status, 404);
        let room = s.store.general_room().unwrap();
        let bad_limit = route(&s, HttpRequest::get(&format!("/api/messages?room={}&limit=x", room.id))).await;
        assert_eq!(bad_limit.status, 400);
    }

    #[tokio::test]
    async fn test_route_ai_conversation_status() {
        let s = state();
        let resp = route(&s, HttpRequest::get("/api/ai-conversation")).await;
        let body = resp.json_body();
        assert_eq!(body["active"], false);
        assert_eq!(body["speed"], 2);
        assert!(body["last_speaker"].is_null());
        assert_eq!(body["room_id"], s.store.lounge_room().unwrap().id);
    }

    #[tokio::test]
    async fn test_route_ai_conversation_tick_inactive() {
        let s = state();
        let resp = route(&s, HttpRequest::new("POST", "/api/ai-conversation", vec![])).await;
        assert_eq!(resp.status, 200);
        let body = resp.json_body();
        assert_eq!(body["outcome"], "inactive");
        assert_eq!(body["next_delay_ms"], 20_000);
    }
}
