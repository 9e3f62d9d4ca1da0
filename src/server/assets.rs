//! The one static page this server has to serve: a canvas-based H.264
//! viewer wired to the broadcast WebSocket (spec §4.3 "plain HTTP GET
//! for any other path"). Shipped inline rather than read from disk so
//! the binary has no runtime dependency on an asset directory.

pub const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>ipkvm</title>
<style>
  html, body { margin: 0; height: 100%; background: #111; }
  canvas { display: block; margin: 0 auto; max-width: 100%; max-height: 100%; }
</style>
</head>
<body>
<canvas id="view"></canvas>
<script src="/jmuxer.min.js"></script>
<script>
  const canvas = document.getElementById('view');
  const jmuxer = new JMuxer({ node: canvas, mode: 'video', flushingTime: 0 });
  const ws = new WebSocket(`ws://${location.host}/ws`);
  ws.binaryType = 'arraybuffer';
  ws.onmessage = (ev) => jmuxer.feed({ video: new Uint8Array(ev.data) });

  function sendInput(obj) {
    if (ws.readyState === WebSocket.OPEN) ws.send(JSON.stringify(obj));
  }
  canvas.addEventListener('mousemove', (ev) => {
    const rect = canvas.getBoundingClientRect();
    sendInput({
      kind: 'pointer_move',
      x: ev.clientX - rect.left,
      y: ev.clientY - rect.top,
      widget_w: rect.width,
      widget_h: rect.height,
    });
  });
  canvas.addEventListener('mousedown', (ev) => sendInput({ kind: 'pointer_button', button: ev.button, pressed: true }));
  canvas.addEventListener('mouseup', (ev) => sendInput({ kind: 'pointer_button', button: ev.button, pressed: false }));
  window.addEventListener('keydown', (ev) => sendInput({ kind: 'key', code: ev.code, pressed: true }));
  window.addEventListener('keyup', (ev) => sendInput({ kind: 'key', code: ev.code, pressed: false }));
</script>
</body>
</html>
"#;

pub fn response_for_path(path: &str) -> (&'static str, &'static [u8]) {
    match path {
        "/" | "/index.html" => ("text/html; charset=utf-8", INDEX_HTML.as_bytes()),
        _ => ("text/plain; charset=utf-8", b"not found"),
    }
}
