//! Edge case integration tests for captcha-vision-mcp.
//!
//! Covers the lifecycle gate, argument validation, the recognition and
//! preprocessing tools, the file tools, and the stdio transport.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::Engine;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use captcha_vision::{
    RecognitionResult, Recognizer, UnavailableRecognizer, VisionError, VisionResult,
};
use captcha_vision_mcp::config::ServerConfig;
use captcha_vision_mcp::context::ToolContext;
use captcha_vision_mcp::protocol::{LifecycleState, ProtocolHandler};
use captcha_vision_mcp::tools::ToolRegistry;
use captcha_vision_mcp::transport::StdioTransport;
use captcha_vision_mcp::types::*;

// ─────────────────────── helpers ───────────────────────

/// Recognizer with a fixed answer that records what it was given.
///
/// With `delay_per_px` set, each call sleeps that long per pixel of image
/// width, so tests can make one call finish after another.
struct ScriptedRecognizer {
    text: String,
    confidence: f64,
    delay_per_px: Duration,
    calls: AtomicUsize,
    last_image: Mutex<Vec<u8>>,
}

impl ScriptedRecognizer {
    fn new(text: &str, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            confidence,
            delay_per_px: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last_image: Mutex::new(Vec::new()),
        })
    }

    fn slow(text: &str, delay_per_px: Duration) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            confidence: 0.9,
            delay_per_px,
            calls: AtomicUsize::new(0),
            last_image: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Recognizer for ScriptedRecognizer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn recognize(&self, image: &[u8], _deadline: Instant) -> VisionResult<RecognitionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_image.lock().unwrap() = image.to_vec();

        if !self.delay_per_px.is_zero() {
            let width = image::load_from_memory(image)
                .map_err(|e| VisionError::Recognition(e.to_string()))?
                .width();
            std::thread::sleep(self.delay_per_px * width);
        }

        Ok(RecognitionResult {
            text: self.text.clone(),
            confidence: self.confidence,
            elapsed: Duration::ZERO,
        })
    }

    fn supports_concurrent_calls(&self) -> bool {
        true
    }
}

fn handler_with(recognizer: Arc<dyn Recognizer>) -> ProtocolHandler {
    handler_with_config(ServerConfig::default(), recognizer)
}

fn handler_with_config(config: ServerConfig, recognizer: Arc<dyn Recognizer>) -> ProtocolHandler {
    let registry = Arc::new(ToolRegistry::new(&config));
    let context = Arc::new(ToolContext::new(config, recognizer));
    ProtocolHandler::new(registry, context)
}

/// Build an MCP JSON-RPC request.
fn mcp_request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

/// Build an initialize request.
fn init_request() -> Value {
    mcp_request(
        0,
        "initialize",
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0" }
        }),
    )
}

fn tool_call(id: i64, name: &str, arguments: Value) -> Value {
    mcp_request(id, "tools/call", json!({ "name": name, "arguments": arguments }))
}

/// Send a JSON-RPC message through the handler and return the response.
async fn send(handler: &ProtocolHandler, msg: Value) -> Option<Value> {
    let parsed: JsonRpcMessage = serde_json::from_value(msg).unwrap();
    handler.handle_message(parsed).await
}

/// Send and unwrap the response.
async fn send_unwrap(handler: &ProtocolHandler, msg: Value) -> Value {
    send(handler, msg).await.expect("expected response")
}

async fn initialized(recognizer: Arc<dyn Recognizer>) -> ProtocolHandler {
    let handler = handler_with(recognizer);
    let resp = send_unwrap(&handler, init_request()).await;
    assert!(resp.get("result").is_some(), "initialize failed: {resp}");
    handler
}

fn error_code(resp: &Value) -> i64 {
    resp["error"]["code"]
        .as_i64()
        .unwrap_or_else(|| panic!("expected error response, got {resp}"))
}

fn structured(resp: &Value) -> &Value {
    let content = &resp["result"]["structuredContent"];
    assert!(!content.is_null(), "expected tool result, got {resp}");
    content
}

/// A patterned RGB image, so filters have something to work on.
fn pattern(width: u32, height: u32) -> image::DynamicImage {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        let v = ((x * 7 + y * 13) % 256) as u8;
        image::Rgb([v, v.wrapping_add(40), 255 - v])
    });
    image::DynamicImage::ImageRgb8(img)
}

fn encode(img: &image::DynamicImage, format: image::ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

fn make_png(width: u32, height: u32) -> Vec<u8> {
    encode(&pattern(width, height), image::ImageFormat::Png)
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Run a stdio session over in-memory pipes.
///
/// Input stays open until `expected` responses have arrived, since end of
/// input closes the connection and drops calls still in flight. Whatever
/// the server writes after that is collected too.
async fn run_stdio(
    handler: ProtocolHandler,
    input: Vec<u8>,
    max_frame_bytes: usize,
    expected: usize,
) -> Vec<Value> {
    let (mut client_in, server_in) = tokio::io::duplex(64 * 1024);
    let (server_out, client_out) = tokio::io::duplex(64 * 1024);

    let transport = Arc::new(StdioTransport::new(handler, max_frame_bytes));
    let serving = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.serve(server_in, server_out).await })
    };

    // The server may stop reading early (oversized frame); ignore that.
    let _ = client_in.write_all(&input).await;

    let mut output = BufReader::new(client_out).lines();
    let mut responses: Vec<Value> = Vec::new();
    while responses.len() < expected {
        match output.next_line().await.unwrap() {
            Some(line) => responses.push(serde_json::from_str(&line).unwrap()),
            None => break,
        }
    }

    drop(client_in);
    while let Some(line) = output.next_line().await.unwrap() {
        responses.push(serde_json::from_str(&line).unwrap());
    }

    serving.await.unwrap().unwrap();
    assert_eq!(transport.handler().state(), LifecycleState::Closed);
    responses
}

fn lines(messages: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for msg in messages {
        out.extend_from_slice(msg.to_string().as_bytes());
        out.push(b'\n');
    }
    out
}

// ═══════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════

/// Test 1: A tool call before initialize is rejected and never runs.
#[tokio::test]
async fn test_01_call_before_initialize() {
    let recognizer = ScriptedRecognizer::new("AB12", 0.95);
    let handler = handler_with(recognizer.clone());

    let msg = tool_call(1, "captcha_recognize", json!({ "image_data": b64(&make_png(20, 10)) }));
    let resp = send_unwrap(&handler, msg).await;

    assert_eq!(error_code(&resp), -32600);
    assert_eq!(resp["id"], 1);
    assert_eq!(recognizer.calls(), 0);
    assert_eq!(handler.state(), LifecycleState::Uninitialized);
    println!("TEST 01 - Call Before Initialize: PASS");
}

/// Test 2: Every method except initialize waits for the handshake.
#[tokio::test]
async fn test_02_gate_covers_all_methods() {
    let handler = handler_with(ScriptedRecognizer::new("X", 0.9));

    for method in ["ping", "tools/list", "no/such/method"] {
        let resp = send_unwrap(&handler, mcp_request(2, method, json!({}))).await;
        assert_eq!(error_code(&resp), -32600, "{method} passed the gate");
    }

    send_unwrap(&handler, init_request()).await;
    let resp = send_unwrap(&handler, mcp_request(3, "ping", json!({}))).await;
    assert_eq!(resp["result"], json!({}));
    println!("TEST 02 - Lifecycle Gate: PASS");
}

/// Test 3: A repeated initialize returns the same result.
#[tokio::test]
async fn test_03_initialize_is_idempotent() {
    let handler = handler_with(ScriptedRecognizer::new("X", 0.9));

    let first = send_unwrap(&handler, init_request()).await;
    let second = send_unwrap(&handler, init_request()).await;

    assert_eq!(first["result"], second["result"]);
    assert_eq!(first["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(first["result"]["serverInfo"]["name"], "captcha-vision-mcp");
    assert!(first["result"]["capabilities"]["tools"].is_object());
    assert_eq!(handler.state(), LifecycleState::Initialized);
    println!("TEST 03 - Idempotent Initialize: PASS");
}

/// Test 4: A closed connection answers nothing.
#[tokio::test]
async fn test_04_closed_connection_is_silent() {
    let handler = initialized(ScriptedRecognizer::new("X", 0.9)).await;
    handler.close();

    assert!(send(&handler, mcp_request(4, "ping", json!({}))).await.is_none());
    assert!(send(&handler, init_request()).await.is_none());
    println!("TEST 04 - Closed Connection: PASS");
}

// ═══════════════════════════════════════════════════════
// DISPATCH
// ═══════════════════════════════════════════════════════

/// Test 5: The four tools are listed with object schemas.
#[tokio::test]
async fn test_05_tools_list() {
    let handler = initialized(ScriptedRecognizer::new("X", 0.9)).await;

    for method in ["tools/list", "list_tools"] {
        let resp = send_unwrap(&handler, mcp_request(5, method, json!({}))).await;
        let tools = resp["result"]["tools"].as_array().unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            [
                "captcha_recognize",
                "image_preprocess",
                "captcha_recognize_file",
                "captcha_recognize_batch"
            ]
        );
        for tool in tools {
            assert_eq!(tool["inputSchema"]["type"], "object");
        }
    }
    println!("TEST 05 - Tools List: PASS");
}

/// Test 6: An unknown tool name is -32601.
#[tokio::test]
async fn test_06_unknown_tool() {
    let handler = initialized(ScriptedRecognizer::new("X", 0.9)).await;

    let resp = send_unwrap(&handler, tool_call(6, "nonexistent_tool", json!({}))).await;
    assert_eq!(error_code(&resp), -32601);

    let legacy = mcp_request(7, "call_tool", json!({ "name": "nonexistent_tool" }));
    assert_eq!(error_code(&send_unwrap(&handler, legacy).await), -32601);
    println!("TEST 06 - Unknown Tool: PASS");
}

/// Test 7: An unknown method is -32601 once initialized.
#[tokio::test]
async fn test_07_unknown_method() {
    let handler = initialized(ScriptedRecognizer::new("X", 0.9)).await;
    let resp = send_unwrap(&handler, mcp_request(8, "resources/list", json!({}))).await;
    assert_eq!(error_code(&resp), -32601);
    println!("TEST 07 - Unknown Method: PASS");
}

/// Test 8: Bad arguments are -32602 and never reach the recognizer.
#[tokio::test]
async fn test_08_invalid_arguments() {
    let recognizer = ScriptedRecognizer::new("X", 0.9);
    let handler = initialized(recognizer.clone()).await;
    let data = b64(&make_png(10, 10));

    let cases = [
        json!({}),
        json!({ "image_data": 42 }),
        json!({ "image_data": "" }),
        json!({ "image_data": data, "confidence_threshold": 1.5 }),
        json!({ "image_data": data, "preprocess": "yes" }),
        json!({ "image_data": data, "colour": "red" }),
    ];
    for (i, args) in cases.into_iter().enumerate() {
        let resp = send_unwrap(&handler, tool_call(i as i64, "captcha_recognize", args)).await;
        assert_eq!(error_code(&resp), -32602, "case {i}: {resp}");
    }

    let missing = mcp_request(20, "tools/call", json!({}));
    assert_eq!(error_code(&send_unwrap(&handler, missing).await), -32602);

    assert_eq!(recognizer.calls(), 0);
    println!("TEST 08 - Invalid Arguments: PASS");
}

/// Test 9: Null counts as omitted and integral numbers satisfy "number".
#[tokio::test]
async fn test_09_null_and_integral_arguments() {
    let handler = initialized(ScriptedRecognizer::new("AB12", 0.95)).await;
    let args = json!({
        "image_data": b64(&make_png(12, 8)),
        "confidence_threshold": 1,
        "preprocess": null
    });

    let resp = send_unwrap(&handler, tool_call(9, "captcha_recognize", args)).await;
    let report = structured(&resp);
    assert_eq!(report["threshold_met"], false);
    assert_eq!(report["applied_operations"], json!(["denoise", "enhance"]));
    println!("TEST 09 - Null And Integral Arguments: PASS");
}

/// Test 10: Notifications and null-id requests get no response.
#[tokio::test]
async fn test_10_no_response_cases() {
    let recognizer = ScriptedRecognizer::new("X", 0.9);
    let handler = initialized(recognizer.clone()).await;

    let notif = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    assert!(send(&handler, notif).await.is_none());

    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": { "requestId": 3, "reason": "user" }
    });
    assert!(send(&handler, cancel).await.is_none());

    let null_id = json!({
        "jsonrpc": "2.0",
        "id": null,
        "method": "tools/call",
        "params": { "name": "captcha_recognize", "arguments": { "image_data": b64(&make_png(4, 4)) } }
    });
    assert!(send(&handler, null_id).await.is_none());
    assert_eq!(recognizer.calls(), 0);
    println!("TEST 10 - No Response Cases: PASS");
}

/// Test 11: String ids are echoed unchanged.
#[tokio::test]
async fn test_11_string_ids() {
    let handler = initialized(ScriptedRecognizer::new("X", 0.9)).await;
    let msg = json!({ "jsonrpc": "2.0", "id": "req-7", "method": "ping" });
    let resp = send_unwrap(&handler, msg).await;
    assert_eq!(resp["id"], "req-7");
    println!("TEST 11 - String Ids: PASS");
}

// ═══════════════════════════════════════════════════════
// RECOGNITION
// ═══════════════════════════════════════════════════════

/// Test 12: Undecodable image data is -1001.
#[tokio::test]
async fn test_12_image_decode_error() {
    let recognizer = ScriptedRecognizer::new("X", 0.9);
    let handler = initialized(recognizer.clone()).await;

    for data in ["not base64 at all!!", "aGVsbG8gd29ybGQ="] {
        let resp = send_unwrap(
            &handler,
            tool_call(12, "captcha_recognize", json!({ "image_data": data })),
        )
        .await;
        assert_eq!(error_code(&resp), -1001, "{data}");
        assert_eq!(resp["error"]["message"], "Image decode error");
        assert!(resp["error"].get("data").is_none());
    }
    assert_eq!(recognizer.calls(), 0);
    println!("TEST 12 - Image Decode Error: PASS");
}

/// Test 13: A recognition reports trimmed text and rounded confidence.
#[tokio::test]
async fn test_13_recognize_report() {
    let recognizer = ScriptedRecognizer::new("  AB12 \n", 0.912345678);
    let handler = initialized(recognizer.clone()).await;

    let resp = send_unwrap(
        &handler,
        tool_call(13, "captcha_recognize", json!({ "image_data": b64(&make_png(60, 20)) })),
    )
    .await;
    let report = structured(&resp);

    assert_eq!(report["success"], true);
    assert_eq!(report["text"], "AB12");
    assert_eq!(report["confidence"], 0.9123);
    assert_eq!(report["threshold_met"], true);
    assert_eq!(report["applied_operations"], json!(["denoise", "enhance"]));
    let elapsed = report["elapsed"].as_f64().unwrap();
    assert!(elapsed >= 0.0);
    assert_eq!(elapsed, (elapsed * 1000.0).round() / 1000.0);
    assert_eq!(recognizer.calls(), 1);

    let text = resp["result"]["content"][0]["text"].as_str().unwrap();
    let from_text: Value = serde_json::from_str(text).unwrap();
    assert_eq!(&from_text, report);
    println!("TEST 13 - Recognition Report: PASS");
}

/// Test 14: Low confidence is still a success, with threshold_met false.
#[tokio::test]
async fn test_14_threshold_not_met() {
    let handler = initialized(ScriptedRecognizer::new("Q7", 0.5)).await;

    let data = b64(&make_png(30, 10));
    let resp = send_unwrap(
        &handler,
        tool_call(14, "captcha_recognize", json!({ "image_data": data })),
    )
    .await;
    assert_eq!(structured(&resp)["success"], true);
    assert_eq!(structured(&resp)["threshold_met"], false);

    let resp = send_unwrap(
        &handler,
        tool_call(
            15,
            "captcha_recognize",
            json!({ "image_data": data, "confidence_threshold": 0.5 }),
        ),
    )
    .await;
    assert_eq!(structured(&resp)["threshold_met"], true);
    println!("TEST 14 - Threshold Not Met: PASS");
}

/// Test 15: Without preprocessing the recognizer sees the original bytes.
#[tokio::test]
async fn test_15_recognize_without_preprocess() {
    let recognizer = ScriptedRecognizer::new("ZZ", 0.9);
    let handler = initialized(recognizer.clone()).await;
    let png = make_png(25, 9);

    let resp = send_unwrap(
        &handler,
        tool_call(
            16,
            "captcha_recognize",
            json!({ "image_data": format!("data:image/png;base64,{}", b64(&png)), "preprocess": false }),
        ),
    )
    .await;

    assert_eq!(structured(&resp)["applied_operations"], json!([]));
    assert_eq!(*recognizer.last_image.lock().unwrap(), png);
    println!("TEST 15 - Recognize Without Preprocess: PASS");
}

/// Test 16: Recognizer failures are -1002.
#[tokio::test]
async fn test_16_recognition_errors() {
    let data = b64(&make_png(10, 10));

    let handler = initialized(Arc::new(UnavailableRecognizer)).await;
    let resp = send_unwrap(
        &handler,
        tool_call(17, "captcha_recognize", json!({ "image_data": data })),
    )
    .await;
    assert_eq!(error_code(&resp), -1002);

    let handler = initialized(ScriptedRecognizer::new("   ", 0.9)).await;
    let resp = send_unwrap(
        &handler,
        tool_call(18, "captcha_recognize", json!({ "image_data": data })),
    )
    .await;
    assert_eq!(error_code(&resp), -1002);
    println!("TEST 16 - Recognition Errors: PASS");
}

/// Test 17: Out-of-range confidence is clamped.
#[tokio::test]
async fn test_17_confidence_clamped() {
    let handler = initialized(ScriptedRecognizer::new("OK", 1.7)).await;
    let resp = send_unwrap(
        &handler,
        tool_call(19, "captcha_recognize", json!({ "image_data": b64(&make_png(8, 8)) })),
    )
    .await;
    assert_eq!(structured(&resp)["confidence"], 1.0);
    println!("TEST 17 - Confidence Clamped: PASS");
}

// ═══════════════════════════════════════════════════════
// PREPROCESSING
// ═══════════════════════════════════════════════════════

/// Test 18: denoise + enhance keeps the dimensions.
#[tokio::test]
async fn test_18_denoise_enhance_keeps_size() {
    let handler = initialized(ScriptedRecognizer::new("X", 0.9)).await;
    let resp = send_unwrap(
        &handler,
        tool_call(
            20,
            "image_preprocess",
            json!({ "image_data": b64(&make_png(100, 40)), "operations": ["denoise", "enhance"] }),
        ),
    )
    .await;
    let report = structured(&resp);

    assert_eq!(report["applied_operations"], json!(["denoise", "enhance"]));
    assert_eq!(report["original_size"], json!({ "width": 100, "height": 40 }));
    assert_eq!(report["processed_size"], json!({ "width": 100, "height": 40 }));
    assert_eq!(report["format"], "png");
    assert!(report.get("processed_image").is_none());
    println!("TEST 18 - Denoise + Enhance: PASS");
}

/// Test 19: Stages run in canonical order whatever the request order.
#[tokio::test]
async fn test_19_canonical_order() {
    let handler = initialized(ScriptedRecognizer::new("X", 0.9)).await;
    let resp = send_unwrap(
        &handler,
        tool_call(
            21,
            "image_preprocess",
            json!({
                "image_data": b64(&make_png(30, 30)),
                "operations": ["resize", "enhance", "denoise", "resize"]
            }),
        ),
    )
    .await;
    assert_eq!(
        structured(&resp)["applied_operations"],
        json!(["denoise", "enhance", "resize"])
    );
    println!("TEST 19 - Canonical Order: PASS");
}

/// Test 20: A 2000x1500 image resizes to exactly 800x600.
#[tokio::test]
async fn test_20_resize_large_image() {
    let handler = initialized(ScriptedRecognizer::new("X", 0.9)).await;
    let resp = send_unwrap(
        &handler,
        tool_call(
            22,
            "image_preprocess",
            json!({ "image_data": b64(&make_png(2000, 1500)), "operations": ["resize"] }),
        ),
    )
    .await;
    assert_eq!(
        structured(&resp)["processed_size"],
        json!({ "width": 800, "height": 600 })
    );
    println!("TEST 20 - Resize Large Image: PASS");
}

/// Test 21: Custom bounds keep the aspect ratio.
#[tokio::test]
async fn test_21_resize_custom_bounds() {
    let handler = initialized(ScriptedRecognizer::new("X", 0.9)).await;
    let resp = send_unwrap(
        &handler,
        tool_call(
            23,
            "image_preprocess",
            json!({
                "image_data": b64(&make_png(100, 40)),
                "operations": ["resize"],
                "max_width": 50,
                "max_height": 50
            }),
        ),
    )
    .await;
    assert_eq!(
        structured(&resp)["processed_size"],
        json!({ "width": 50, "height": 20 })
    );
    println!("TEST 21 - Resize Custom Bounds: PASS");
}

/// Test 22: No operations returns the input untouched.
#[tokio::test]
async fn test_22_empty_operations_is_identity() {
    let handler = initialized(ScriptedRecognizer::new("X", 0.9)).await;
    let data = b64(&make_png(33, 17));
    let resp = send_unwrap(
        &handler,
        tool_call(
            24,
            "image_preprocess",
            json!({ "image_data": data, "operations": [], "return_processed_image": true }),
        ),
    )
    .await;
    let report = structured(&resp);

    assert_eq!(report["applied_operations"], json!([]));
    assert_eq!(report["processed_size"], report["original_size"]);
    assert_eq!(report["elapsed"], 0.0);
    assert_eq!(report["processed_image"], data);

    let content = resp["result"]["content"].as_array().unwrap();
    assert_eq!(content.len(), 2);
    assert_eq!(content[1]["type"], "image");
    assert_eq!(content[1]["mimeType"], "image/png");
    println!("TEST 22 - Empty Operations: PASS");
}

/// Test 23: The input format is kept.
#[tokio::test]
async fn test_23_format_preserved() {
    let handler = initialized(ScriptedRecognizer::new("X", 0.9)).await;
    let jpeg = encode(&pattern(40, 20), image::ImageFormat::Jpeg);
    let resp = send_unwrap(
        &handler,
        tool_call(
            25,
            "image_preprocess",
            json!({ "image_data": b64(&jpeg), "operations": ["enhance"], "return_processed_image": true }),
        ),
    )
    .await;
    let report = structured(&resp);
    assert_eq!(report["format"], "jpeg");

    let out = base64::engine::general_purpose::STANDARD
        .decode(report["processed_image"].as_str().unwrap())
        .unwrap();
    assert_eq!(image::guess_format(&out).unwrap(), image::ImageFormat::Jpeg);
    println!("TEST 23 - Format Preserved: PASS");
}

/// Test 24: Unknown operations and out-of-range factors are rejected.
#[tokio::test]
async fn test_24_preprocess_bad_arguments() {
    let handler = initialized(ScriptedRecognizer::new("X", 0.9)).await;
    let data = b64(&make_png(10, 10));

    let cases = [
        json!({ "image_data": data, "operations": ["blur"] }),
        json!({ "image_data": data, "operations": ["enhance"], "contrast": 0.0 }),
        json!({ "image_data": data, "operations": ["resize"], "max_width": 0 }),
        json!({ "image_data": data }),
    ];
    for (i, args) in cases.into_iter().enumerate() {
        let resp = send_unwrap(&handler, tool_call(26, "image_preprocess", args)).await;
        assert_eq!(error_code(&resp), -32602, "case {i}: {resp}");
    }
    println!("TEST 24 - Preprocess Bad Arguments: PASS");
}

// ═══════════════════════════════════════════════════════
// FILES
// ═══════════════════════════════════════════════════════

/// Test 25: Recognize a captcha from disk.
#[tokio::test]
async fn test_25_recognize_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("captcha.png");
    std::fs::write(&path, make_png(40, 15)).unwrap();
    let path = path.to_str().unwrap().to_string();

    let handler = initialized(ScriptedRecognizer::new("K9P2", 0.93)).await;
    let resp = send_unwrap(
        &handler,
        tool_call(27, "captcha_recognize_file", json!({ "file_path": path })),
    )
    .await;
    let report = structured(&resp);
    assert_eq!(report["file_path"], path);
    assert_eq!(report["text"], "K9P2");
    assert_eq!(report["success"], true);

    let missing = dir.path().join("missing.png");
    let resp = send_unwrap(
        &handler,
        tool_call(28, "captcha_recognize_file", json!({ "file_path": missing })),
    )
    .await;
    assert_eq!(error_code(&resp), -32602);
    println!("TEST 25 - Recognize File: PASS");
}

/// Test 26: A failing file does not fail the batch.
#[tokio::test]
async fn test_26_batch_partial_failure() {
    let dir = tempfile::tempdir().unwrap();
    let good_a = dir.path().join("a.png");
    let good_b = dir.path().join("b.png");
    let broken = dir.path().join("broken.png");
    std::fs::write(&good_a, make_png(20, 10)).unwrap();
    std::fs::write(&good_b, make_png(30, 10)).unwrap();
    std::fs::write(&broken, b"not an image").unwrap();
    let missing = dir.path().join("missing.png");

    let recognizer = ScriptedRecognizer::new("W4", 0.88);
    let handler = initialized(recognizer.clone()).await;
    let resp = send_unwrap(
        &handler,
        tool_call(
            29,
            "captcha_recognize_batch",
            json!({ "file_paths": [good_a, broken, good_b, missing] }),
        ),
    )
    .await;
    let report = structured(&resp);

    assert_eq!(report["total_files"], 4);
    assert_eq!(report["successful_count"], 2);
    assert_eq!(report["failed_count"], 2);

    let results = report["results"].as_array().unwrap();
    assert_eq!(results[0]["text"], "W4");
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[1]["error"]["code"], -1001);
    assert_eq!(results[2]["success"], true);
    assert_eq!(results[3]["error"]["code"], -32602);
    assert_eq!(recognizer.calls(), 2);
    println!("TEST 26 - Batch Partial Failure: PASS");
}

/// Test 27: Batches are bounded.
#[tokio::test]
async fn test_27_batch_limits() {
    let handler = initialized(ScriptedRecognizer::new("X", 0.9)).await;

    let too_many: Vec<String> = (0..11).map(|i| format!("/tmp/{i}.png")).collect();
    for paths in [json!([]), json!(too_many)] {
        let resp = send_unwrap(
            &handler,
            tool_call(30, "captcha_recognize_batch", json!({ "file_paths": paths })),
        )
        .await;
        assert_eq!(error_code(&resp), -32602);
    }
    println!("TEST 27 - Batch Limits: PASS");
}

// ═══════════════════════════════════════════════════════
// STDIO TRANSPORT
// ═══════════════════════════════════════════════════════

/// Test 28: Malformed frames get errors and the session continues.
#[tokio::test]
async fn test_28_stdio_malformed_frames() {
    let handler = handler_with(ScriptedRecognizer::new("X", 0.9));

    let mut input = lines(&[init_request()]);
    input.extend_from_slice(b"{not json\n");
    input.extend_from_slice(b"\xff\xfe\n");
    input.extend_from_slice(b"\n   \n");
    input.extend_from_slice(br#"{"jsonrpc":"2.0","id":9}"#);
    input.push(b'\n');
    input.extend_from_slice(&lines(&[mcp_request(10, "ping", json!({}))]));

    let responses = run_stdio(handler, input, 1 << 20, 5).await;
    assert_eq!(responses.len(), 5);

    assert_eq!(responses[0]["id"], 0);
    assert!(responses[0]["result"].is_object());
    assert_eq!(error_code(&responses[1]), -32700);
    assert!(responses[1]["id"].is_null());
    assert_eq!(error_code(&responses[2]), -32700);
    assert_eq!(error_code(&responses[3]), -32600);
    assert_eq!(responses[3]["id"], 9);
    assert_eq!(responses[4]["id"], 10);
    assert_eq!(responses[4]["result"], json!({}));
    println!("TEST 28 - Stdio Malformed Frames: PASS");
}

/// Test 29: An oversized frame closes the connection.
#[tokio::test]
async fn test_29_stdio_oversized_frame() {
    let handler = handler_with(ScriptedRecognizer::new("X", 0.9));

    let mut input = lines(&[init_request()]);
    input.extend(std::iter::repeat(b'x').take(4096));
    input.push(b'\n');
    input.extend_from_slice(&lines(&[mcp_request(11, "ping", json!({}))]));

    let responses = run_stdio(handler, input, 1024, 1).await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["id"], 0);
    println!("TEST 29 - Stdio Oversized Frame: PASS");
}

/// Test 30: A slow tool call does not hold back later requests.
#[tokio::test]
async fn test_30_stdio_calls_run_concurrently() {
    let recognizer = ScriptedRecognizer::slow("SLOW", Duration::from_millis(60));
    let handler = handler_with(recognizer.clone());

    let slow = tool_call(
        1,
        "captcha_recognize",
        json!({ "image_data": b64(&make_png(10, 4)), "preprocess": false }),
    );
    let fast = tool_call(
        2,
        "captcha_recognize",
        json!({ "image_data": b64(&make_png(1, 1)), "preprocess": false }),
    );
    let input = lines(&[init_request(), slow, fast, mcp_request(3, "ping", json!({}))]);

    let responses = run_stdio(handler, input, 1 << 20, 4).await;
    let order: Vec<i64> = responses.iter().map(|r| r["id"].as_i64().unwrap()).collect();

    assert_eq!(order.len(), 4);
    assert_eq!(order[0], 0);
    assert_eq!(*order.last().unwrap(), 1, "slow call finished early: {order:?}");
    assert_eq!(recognizer.calls(), 2);
    println!("TEST 30 - Stdio Concurrency: PASS");
}

/// Test 31: A final line without a newline is still served.
#[tokio::test]
async fn test_31_stdio_unterminated_last_line() {
    let handler = handler_with(ScriptedRecognizer::new("X", 0.9));
    let mut input = lines(&[init_request()]);
    input.extend_from_slice(mcp_request(12, "ping", json!({})).to_string().as_bytes());

    // The unterminated ping is only seen once input ends.
    let responses = run_stdio(handler, input, 1 << 20, 1).await;
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[1]["id"], 12);
    println!("TEST 31 - Stdio Unterminated Line: PASS");
}

// ═══════════════════════════════════════════════════════
// IMAGE LIMITS
// ═══════════════════════════════════════════════════════

/// Test 32: An image over the pixel limit is a decode error for every tool.
#[tokio::test]
async fn test_32_pixel_limit() {
    let recognizer = ScriptedRecognizer::new("AB12", 0.95);
    let config = ServerConfig {
        max_image_pixels: 100 * 100,
        ..ServerConfig::default()
    };
    let handler = handler_with_config(config, recognizer.clone());
    send_unwrap(&handler, init_request()).await;

    let big = b64(&make_png(101, 100));
    let calls = [
        tool_call(1, "captcha_recognize", json!({ "image_data": big })),
        tool_call(2, "image_preprocess", json!({ "image_data": big, "operations": ["resize"] })),
    ];
    for msg in calls {
        let resp = send_unwrap(&handler, msg).await;
        assert_eq!(error_code(&resp), -1001);
        assert_eq!(resp["error"]["message"], "Image decode error");
    }
    assert_eq!(recognizer.calls(), 0);

    let fits = tool_call(3, "captcha_recognize", json!({ "image_data": b64(&make_png(100, 100)) }));
    let resp = send_unwrap(&handler, fits).await;
    assert_eq!(structured(&resp)["text"], "AB12");
    println!("TEST 32 - Pixel Limit: PASS");
}

/// Test 33: Preprocessing a large image leaves the runtime free for other requests.
#[tokio::test]
async fn test_33_preprocess_does_not_block_runtime() {
    let mut config = ServerConfig::default();
    config.set_max_image_bytes(32 * 1024 * 1024);
    let handler = Arc::new(handler_with_config(config, ScriptedRecognizer::new("X", 0.9)));
    send_unwrap(&handler, init_request()).await;

    let heavy = tool_call(
        1,
        "image_preprocess",
        json!({
            "image_data": b64(&make_png(2000, 1500)),
            "operations": ["denoise", "enhance", "resize"]
        }),
    );
    let task = {
        let handler = handler.clone();
        tokio::spawn(async move { send_unwrap(&handler, heavy).await })
    };
    tokio::task::yield_now().await;

    // Single-threaded runtime: the ping is only served here if the image
    // work is off the runtime thread.
    let pong = send_unwrap(&handler, mcp_request(2, "ping", json!({}))).await;
    assert_eq!(pong["id"], 2);
    assert!(!task.is_finished(), "preprocess ran on the runtime thread");

    let resp = task.await.unwrap();
    assert_eq!(
        structured(&resp)["processed_size"],
        json!({ "width": 800, "height": 600 })
    );
    println!("TEST 33 - Preprocess Off Runtime: PASS");
}
