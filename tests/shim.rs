use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ferry::http::{header, Body, Bytes, HeaderValue, Method, RequestBuilder, StatusCode};
use ferry::platform::{BufferedSink, IncomingMessage, Node, Sink};
use ferry::{
    BoxError, Config, Context, ErrorKind, ErrorRecord, Fallback, Report, Request, Respond,
    Response, Shim, Stage, StaticEnv, TaskHandle,
};

#[derive(Clone, Default)]
struct Recorder {
    failures: Arc<Mutex<Vec<ErrorRecord>>>,
    deferred: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn failures(&self) -> Vec<ErrorRecord> {
        self.failures.lock().unwrap().clone()
    }

    fn deferred(&self) -> Vec<String> {
        self.deferred.lock().unwrap().clone()
    }
}

impl Report for Recorder {
    fn failure(&self, record: &ErrorRecord) {
        self.failures.lock().unwrap().push(record.clone());
    }

    fn deferred(&self, err: &BoxError) {
        self.deferred.lock().unwrap().push(err.to_string());
    }
}

fn config(recorder: &Recorder) -> Config {
    Config::new().reporter(recorder.clone())
}

async fn body(response: Response) -> Bytes {
    response.into_body().bytes().await.unwrap()
}

fn get(uri: &str) -> Request {
    RequestBuilder::new().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn fetch_ok() {
    let recorder = Recorder::default();
    let shim = Shim::new(|_: Request, _: Context| async { Ok::<_, BoxError>("ok") })
        .with_config(config(&recorder));

    let response = shim.fetch(get("https://example.com/")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(response).await, "ok");
    assert!(recorder.failures().is_empty());
}

#[tokio::test]
async fn node_ok() {
    let recorder = Recorder::default();
    let shim = Shim::new(|_: Request, _: Context| async { Ok::<_, BoxError>("ok") })
        .with_config(config(&recorder));

    let mut sink = BufferedSink::new();
    shim.node(IncomingMessage::new("GET", "/"), &mut sink).await;

    assert_eq!(sink.status(), StatusCode::OK);
    assert_eq!(sink.reason(), Some("OK"));
    assert_eq!(sink.body().unwrap(), "ok");
    assert_eq!(sink.ends(), 1);
    assert!(recorder.failures().is_empty());
}

#[tokio::test]
async fn method_and_path_preserved() {
    let echo = |req: Request, cx: Context| async move {
        Ok::<_, BoxError>(format!(
            "{} {} {}",
            req.method(),
            req.uri().path(),
            cx.function_path()
        ))
    };
    let shim = Shim::new(echo);

    let request = RequestBuilder::new()
        .method(Method::DELETE)
        .uri("/projects/3")
        .body(Body::empty())
        .unwrap();
    let response = shim.fetch(request).await;
    assert_eq!(body(response).await, "DELETE /projects/3 /projects/3");

    let mut sink = BufferedSink::new();
    shim.node(IncomingMessage::new("PATCH", "/chat/9?draft=1"), &mut sink)
        .await;
    assert_eq!(sink.body().unwrap(), "PATCH /chat/9 /chat/9");
}

#[tokio::test]
async fn get_requests_have_no_body() {
    let shim = Shim::new(|req: Request, _: Context| async move {
        Ok::<_, BoxError>(format!("{:?}", req.into_body()))
    });

    let request = RequestBuilder::new()
        .method(Method::GET)
        .uri("/")
        .body(Body::once("payload"))
        .unwrap();
    assert_eq!(body(shim.fetch(request).await).await, "Body::Empty");

    let mut sink = BufferedSink::new();
    let message = IncomingMessage::new("GET", "/")
        .body("payload".to_owned())
        .raw_body("payload");
    shim.node(message, &mut sink).await;
    assert_eq!(sink.body().unwrap(), "Body::Empty");
}

#[tokio::test]
async fn post_body_reaches_handler() {
    let shim = Shim::new(|req: Request, _: Context| async move {
        req.into_body().text().await
    });

    let mut sink = BufferedSink::new();
    let message = IncomingMessage::new("POST", "/api/chat").raw_body("hello");
    shim.node(message, &mut sink).await;
    assert_eq!(sink.body().unwrap(), "hello");
}

#[tokio::test]
async fn html_gets_utf8_charset() {
    let shim = Shim::new(|_: Request, _: Context| async {
        let mut response = "<h1>hi</h1>".respond();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        Ok::<_, BoxError>(response)
    });

    let response = shim.fetch(get("/")).await;
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/html; charset=utf-8"
    );

    let mut sink = BufferedSink::new();
    shim.node(IncomingMessage::new("GET", "/"), &mut sink).await;
    assert_eq!(
        sink.headers()[header::CONTENT_TYPE],
        "text/html; charset=utf-8"
    );
}

#[tokio::test]
async fn framing_headers_not_copied_to_sink() {
    let shim = Shim::new(|_: Request, _: Context| async {
        let mut response = Response::new(Body::once("compressed?"));
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("999"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));
        Ok::<_, BoxError>(response)
    });

    let mut sink = BufferedSink::new();
    shim.node(IncomingMessage::new("GET", "/"), &mut sink).await;

    let headers = sink.headers();
    assert!(headers.get(header::CONTENT_LENGTH).is_none());
    assert!(headers.get(header::TRANSFER_ENCODING).is_none());
    assert!(headers.get(header::CONTENT_ENCODING).is_none());
    assert_eq!(headers["x-request-id"], "abc");
    assert_eq!(headers.get_all(header::SET_COOKIE).iter().count(), 2);
    assert_eq!(headers.len(), 3);
}

#[tokio::test]
async fn handler_failure_becomes_500() {
    let recorder = Recorder::default();
    let shim = Shim::new(|_: Request, _: Context| async {
        Err::<(), BoxError>("boom".into())
    })
    .with_config(config(&recorder));

    let response = shim.fetch(get("/")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8_lossy(&body(response).await).contains("boom"));

    let failures = recorder.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, ErrorKind::Handler);
    assert_eq!(failures[0].stage, Stage::Handling);
    assert_eq!(failures[0].message, "boom");

    let mut sink = BufferedSink::new();
    let stage = shim
        .run(&Node::<BufferedSink>::new(), IncomingMessage::new("GET", "/"), &mut sink)
        .await;
    assert_eq!(stage, Stage::Completed);
    assert_eq!(sink.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8_lossy(sink.body().unwrap()).contains("boom"));
    assert_eq!(sink.ends(), 1);
    assert_eq!(recorder.failures().len(), 2);
}

#[tokio::test]
async fn handler_panic_becomes_500() {
    let recorder = Recorder::default();
    let shim = Shim::new(|_: Request, _: Context| async {
        if true {
            panic!("boom");
        }
        Ok::<_, BoxError>("unreachable")
    })
    .with_config(config(&recorder));

    let response = shim.fetch(get("/")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8_lossy(&body(response).await).contains("handler panicked: boom"));

    let mut sink = BufferedSink::new();
    shim.node(IncomingMessage::new("GET", "/"), &mut sink).await;
    assert_eq!(sink.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(sink.ends(), 1);

    let failures = recorder.failures();
    assert_eq!(failures.len(), 2);
    for failure in failures {
        assert_eq!(failure.kind, ErrorKind::Handler);
        assert_eq!(failure.stage, Stage::Handling);
        assert_eq!(failure.message, "handler panicked: boom");
    }
}

#[tokio::test]
async fn json_fallback() {
    let shim = Shim::new(|_: Request, _: Context| async {
        Err::<(), BoxError>("model unavailable".into())
    })
    .with_config(Config::new().fallback(Fallback::Json));

    let response = shim.fetch(get("/")).await;
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");

    let value: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(value["error"], "Internal Server Error");
    assert_eq!(value["message"], "model unavailable");
}

#[tokio::test]
async fn malformed_request_becomes_500() {
    let recorder = Recorder::default();
    let shim = Shim::new(|_: Request, _: Context| async { Ok::<_, BoxError>("unreachable") })
        .with_config(config(&recorder));

    let mut sink = BufferedSink::new();
    shim.node(IncomingMessage::new("G ET", "/"), &mut sink).await;

    assert_eq!(sink.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let failures = recorder.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, ErrorKind::MalformedRequest);
    assert_eq!(failures[0].stage, Stage::NormalizingRequest);
}

/// A sink whose connection drops while the body is written.
#[derive(Default)]
struct BrokenSink {
    started: bool,
    ends: usize,
}

#[ferry::async_trait]
impl Sink for BrokenSink {
    fn headers_sent(&self) -> bool {
        self.started
    }

    fn set_status(&mut self, _: StatusCode, _: Option<&str>) {}

    fn append_header(&mut self, _: &header::HeaderName, _: &HeaderValue) {}

    async fn end(&mut self, _: Bytes) -> std::io::Result<()> {
        self.started = true;
        self.ends += 1;
        Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "connection reset",
        ))
    }
}

#[tokio::test]
async fn translation_failure_is_logged_not_retried() {
    let recorder = Recorder::default();
    let shim = Shim::new(|_: Request, _: Context| async { Ok::<_, BoxError>("ok") })
        .with_config(config(&recorder));

    let mut sink = BrokenSink::default();
    shim.node(IncomingMessage::new("GET", "/"), &mut sink).await;

    assert_eq!(sink.ends, 1);
    let failures = recorder.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, ErrorKind::Translation);
    assert_eq!(failures[0].stage, Stage::TranslatingResponse);
    assert_eq!(failures[0].trace.as_deref(), Some("connection reset"));
}

#[tokio::test]
async fn deferred_failure_is_reported_and_dropped() {
    let recorder = Recorder::default();
    let handles: Arc<Mutex<Vec<TaskHandle>>> = Arc::default();

    let registered = handles.clone();
    let shim = Shim::new(move |_: Request, cx: Context| {
        let registered = registered.clone();
        async move {
            let failing = cx.wait_until(async { Err::<(), BoxError>("sync failed".into()) });
            let succeeding = cx.wait_until(async { Ok::<(), BoxError>(()) });
            registered.lock().unwrap().extend([failing, succeeding]);
            Ok::<_, BoxError>("ok")
        }
    })
    .with_config(config(&recorder));

    let response = shim.fetch(get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(response).await, "ok");

    let handles = std::mem::take(&mut *handles.lock().unwrap());
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.join().await);
    }

    assert_eq!(results, [false, true]);
    assert_eq!(recorder.deferred(), ["sync failed"]);
    assert!(recorder.failures().is_empty());
}

#[tokio::test]
async fn deferred_panic_is_contained() {
    let recorder = Recorder::default();
    let shim = Shim::new(|_: Request, cx: Context| async move {
        let handle = cx.wait_until(async {
            if true {
                panic!("lost");
            }
            Ok::<(), BoxError>(())
        });
        Ok::<_, BoxError>(handle.join().await.to_string())
    })
    .with_config(config(&recorder));

    let response = shim.fetch(get("/")).await;
    assert_eq!(body(response).await, "false");
    assert_eq!(recorder.deferred(), ["deferred task panicked: lost"]);
}

#[test]
fn deferred_work_starts_before_call_returns() {
    let started = Arc::new(AtomicBool::new(false));

    let flag = started.clone();
    let shim = Shim::new(move |_: Request, cx: Context| {
        let flag = flag.clone();
        async move {
            cx.wait_until(async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            });
            Ok::<_, BoxError>("ok")
        }
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let response = runtime.block_on(shim.fetch(get("/")));
    drop(runtime);

    assert_eq!(response.status(), StatusCode::OK);
    assert!(started.load(Ordering::SeqCst));
}

#[tokio::test]
async fn env_is_passed_through() {
    let shim = Shim::new(|_: Request, cx: Context| async move {
        Ok::<_, BoxError>(cx.var("OPENAI_BASE_URL").unwrap_or("unset").to_owned())
    })
    .with_config(Config::new().env(StaticEnv::new([(
        "OPENAI_BASE_URL",
        "https://api.example.com",
    )])));

    assert_eq!(body(shim.fetch(get("/")).await).await, "https://api.example.com");
}

#[test]
fn load_failure_is_an_import_error() {
    let result = Shim::load(|| {
        Err::<fn(Request, Context) -> std::future::Ready<Result<(), BoxError>>, _>(
            "server build missing",
        )
    });

    let err = result.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Import);
    assert_eq!(err.to_string(), "failed to load handler: server build missing");
}

#[tokio::test]
async fn io_sink_computes_framing() {
    let shim = Shim::new(|_: Request, _: Context| async {
        let mut response = "ok".respond();
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("999"));
        Ok::<_, BoxError>(response)
    });

    let mut sink = ferry::platform::IoSink::new(Vec::new());
    shim.node(IncomingMessage::new("GET", "/"), &mut sink).await;

    let written = String::from_utf8(sink.into_inner()).unwrap();
    assert_eq!(
        written,
        "HTTP/1.1 200 OK\r\ncontent-type: text/plain; charset=utf-8\r\ncontent-length: 2\r\n\r\nok"
    );
}

#[tokio::test]
async fn io_sink_drops_body_of_no_content() {
    let shim = Shim::new(|_: Request, _: Context| async {
        Ok::<_, BoxError>((StatusCode::NO_CONTENT, "leftover").respond())
    });

    let mut sink = ferry::platform::IoSink::new(Vec::new());
    shim.node(IncomingMessage::new("DELETE", "/projects/3"), &mut sink).await;

    let written = String::from_utf8(sink.into_inner()).unwrap();
    assert_eq!(
        written,
        "HTTP/1.1 204 No Content\r\ncontent-type: text/plain; charset=utf-8\r\n\r\n"
    );
}
