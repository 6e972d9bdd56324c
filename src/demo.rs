// Demo mode: drive the whole core against a simulated page
//
// Builds an in-memory host page with a small React-shaped app, attaches
// detection + bridge + all four monitors, simulates realistic page activity
// (console chatter, fetch/XHR traffic, performance entries, DOM mutations),
// picks a component programmatically, and prints every assembled context
// block - the same text a chat turn would carry.
//
// Run with: rspy demo

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream;
use serde_json::json;
use tokio::time::sleep;

use rspy::chat::{self, ChatMessage, ChatTransport, ChunkStream};
use rspy::config::Config;
use rspy::context::{ContextAssembler, ContextType};
use rspy::detect::DetectionBootstrap;
use rspy::export::{generate_session_id, SessionWriter};
use rspy::host::sim::{FiberSpec, SimPage};
use rspy::host::{
    ConsoleLevel, DomEvent, DomNode, HostRequest, HostValue, PerfEntry, PerfEntryType, Rect,
};
use rspy::bridge::RenderTreeBridge;
use rspy::monitors::{ConsoleMonitor, DomMonitor, NetworkMonitor, PerformanceMonitor};
use rspy::picker::{Picker, SelectionEvent};
use rspy::registry::Registry;

/// A canned transport so the demo can show a full context-carrying turn
/// without a provider.
struct DemoTransport;

#[async_trait::async_trait]
impl ChatTransport for DemoTransport {
    async fn complete(&self, _messages: &[ChatMessage]) -> rspy::Result<String> {
        Ok("UserList re-renders because its `users` hook state is replaced on every fetch."
            .to_string())
    }

    async fn stream(&self, _messages: &[ChatMessage]) -> rspy::Result<ChunkStream> {
        let chunks = [
            "UserList re-renders because ",
            "its `users` hook state is replaced ",
            "on every fetch.",
        ];
        let chunks: Vec<rspy::Result<String>> =
            chunks.into_iter().map(|c| Ok(c.to_string())).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

pub async fn run_demo(config: Config) -> Result<()> {
    println!("rspy demo - simulated page, real instrumentation\n");

    // ── The page ─────────────────────────────────────────────────────────
    let page = SimPage::new();
    page.routes().respond_with(
        "GET",
        "/api/users",
        rspy::host::HostResponse {
            status: 200,
            status_text: "OK".into(),
            headers: vec![("content-type".into(), "application/json".into())],
            body: HostValue::string(r#"[{"id":1,"name":"Ada"},{"id":2,"name":"Grace"}]"#),
        },
        Some(Duration::from_millis(15)),
    );
    page.routes().fail("POST", "/api/telemetry", "connection refused");
    page.routes().respond_text("GET", "/api/health", 200, "ok");

    // ── Detection and bridge ─────────────────────────────────────────────
    let registry = Arc::new(Registry::new());
    let detection = Arc::new(DetectionBootstrap::new(page.clone(), config.detection.clone()));
    detection.start();
    let bridge = RenderTreeBridge::attach(
        page.clone(),
        registry.clone(),
        &detection,
        config.bridge.clone(),
    )
    .await;
    let detected = detection.wait_for(Duration::from_secs(10)).await?;
    println!(
        "detection: react={} version={} devtools={} (bridge degraded: {})",
        detected.is_react,
        detected.version.as_deref().unwrap_or("-"),
        detected.devtools,
        bridge.is_degraded(),
    );

    // ── Monitors ─────────────────────────────────────────────────────────
    let console = ConsoleMonitor::new(page.clone(), config.monitors.console_capacity);
    let network = NetworkMonitor::new(page.clone(), config.monitors.network_capacity);
    let performance = PerformanceMonitor::new(page.clone());
    let dom = DomMonitor::new(
        page.clone(),
        config.monitors.dom_capacity,
        config.monitors.dom_root.clone(),
    );

    // Optional JSONL session export, fed by monitor tees.
    let mut export_task = None;
    if config.export.enabled {
        let session_id = generate_session_id();
        let (writer, tx) = SessionWriter::new(config.export.dir.clone(), session_id, 256)?;
        println!("session export: {:?}", writer.path());
        console.with_tee(tx.clone());
        network.with_tee(tx.clone());
        performance.with_tee(tx.clone());
        dom.with_tee(tx);
        export_task = Some(tokio::spawn(writer.run()));
    }

    // ── Mount the app ────────────────────────────────────────────────────
    page.mount(
        FiberSpec::component("App")
            .props(HostValue::object([("version", HostValue::string("2.4.1"))]))
            .source("src/App.tsx", 12, 1)
            .child(
                FiberSpec::component("Header")
                    .child(FiberSpec::host("header", Rect::new(0.0, 0.0, 1280.0, 60.0)).child(
                        FiberSpec::host("h1", Rect::new(20.0, 10.0, 300.0, 40.0))
                            .child(FiberSpec::text("Team dashboard")),
                    )),
            )
            .child(
                FiberSpec::component("UserList")
                    .source("src/UserList.tsx", 8, 1)
                    .hooks(vec![
                        HostValue::array([
                            HostValue::object([("id", HostValue::number(1.0))]),
                            HostValue::object([("id", HostValue::number(2.0))]),
                        ]),
                        HostValue::Bool(false),
                        HostValue::function("refresh"),
                    ])
                    .child(
                        FiberSpec::host("ul", Rect::new(0.0, 80.0, 600.0, 300.0))
                            .attr("class", "user-list")
                            .child(FiberSpec::host("li", Rect::new(0.0, 80.0, 600.0, 30.0)).key("1"))
                            .child(FiberSpec::host("li", Rect::new(0.0, 110.0, 600.0, 30.0)).key("2")),
                    ),
            ),
    )?;
    println!(
        "registry: {} records, {} selectable, {} roots\n",
        registry.len(),
        registry.all().len(),
        registry.roots().len(),
    );

    console.start()?;
    network.start()?;
    performance.start()?;
    dom.start()?;

    // ── Simulated page activity ──────────────────────────────────────────
    page.console_log(&[HostValue::string("App booted")]);
    page.console_call(
        ConsoleLevel::Warn,
        &[HostValue::string("users payload larger than expected")],
    );
    page.console_error(&[
        HostValue::string("failed to sync telemetry"),
        HostValue::object([
            ("retries", HostValue::number(3.0)),
            ("endpoint", HostValue::string("/api/telemetry")),
        ]),
    ]);

    let _ = page
        .page_fetch(HostRequest {
            method: "GET".into(),
            url: "/api/users".into(),
            headers: vec![("accept".into(), "application/json".into())],
            body: None,
        })
        .await;
    let _ = page
        .page_fetch(HostRequest {
            method: "POST".into(),
            url: "/api/telemetry".into(),
            headers: Vec::new(),
            body: Some(HostValue::object([(
                "events",
                HostValue::number(42.0),
            )])),
        })
        .await;
    page.page_xhr(
        HostRequest {
            method: "GET".into(),
            url: "/api/health".into(),
            headers: Vec::new(),
            body: None,
        },
        Box::new(|_| {}),
    );

    page.emit_perf(PerfEntry {
        entry_type: PerfEntryType::Navigation,
        name: "document".into(),
        start_time: 0.0,
        duration: 1650.0,
        detail: json!({"response_start": 110.0, "load_event_end": 1650.0}),
    });
    page.emit_perf(PerfEntry {
        entry_type: PerfEntryType::Paint,
        name: "first-contentful-paint".into(),
        start_time: 420.0,
        duration: 0.0,
        detail: json!({}),
    });
    page.emit_perf(PerfEntry {
        entry_type: PerfEntryType::LargestContentfulPaint,
        name: "largest-contentful-paint".into(),
        start_time: 980.0,
        duration: 0.0,
        detail: json!({}),
    });
    page.emit_perf(PerfEntry {
        entry_type: PerfEntryType::LayoutShift,
        name: "layout-shift".into(),
        start_time: 1100.0,
        duration: 0.0,
        detail: json!({"value": 0.07, "had_recent_input": false}),
    });

    let ul = page
        .find_fiber("ul")
        .and_then(|f| f.dom_sim())
        .expect("mounted list element");
    ul.set_attribute("class", "user-list loading");
    ul.set_attribute("class", "user-list");

    // ── Pick a component ─────────────────────────────────────────────────
    let picker = Picker::new(page.clone(), registry.clone());
    picker.begin_picking(Arc::new(|event| match event {
        SelectionEvent::Selected(record) => println!("picked: {} ({:?})", record.name, record.kind),
        SelectionEvent::Cancelled => println!("picking cancelled"),
    }));
    page.dispatch(DomEvent::PointerMove { x: 100.0, y: 100.0 });
    page.scheduler_sim().run_frame();
    page.dispatch(DomEvent::Click { x: 100.0, y: 100.0 });

    // ── Assemble context ─────────────────────────────────────────────────
    let assembler = ContextAssembler::new(config.assembler.clone())
        .with_console(console.clone())
        .with_network(network.clone())
        .with_performance(performance.clone())
        .with_dom(dom.clone())
        .with_registry(registry.clone())
        .with_picker(picker.clone());

    for context_type in [
        ContextType::Components,
        ContextType::Console,
        ContextType::Network,
        ContextType::Performance,
        ContextType::Dom,
    ] {
        println!("\n{}", assembler.context_for(context_type, None));
    }

    let stats = assembler.stats();
    println!(
        "\nstats: {} console entries ({} errors), {}/{} requests ok, avg {:.1}ms, \
         {} mutations, CLS {:.4}",
        stats.console_total,
        stats.console_errors,
        stats.requests_completed,
        stats.requests_total,
        stats.avg_request_ms,
        stats.dom_mutations,
        stats.cumulative_layout_shift,
    );
    println!(
        "har export: {} entries",
        network.har()["log"]["entries"].as_array().map_or(0, Vec::len)
    );

    // ── One chat turn with the assembled context ─────────────────────────
    let transport = DemoTransport;
    let messages = chat::with_context(
        Some(assembler.context_for(ContextType::Components, None)),
        vec![ChatMessage::user("Why does UserList re-render so often?")],
    );
    let stream = transport.stream(&messages).await?;
    print!("\nassistant: ");
    let answer = chat::consume_stream(stream, |chunk| {
        print!("{chunk}");
    })
    .await?;
    println!("\n({} chars streamed)", answer.len());

    // ── Teardown: restore every intercepted global ───────────────────────
    console.stop();
    network.stop();
    performance.stop();
    dom.stop();
    // The assembler holds monitor handles; drop everything so the tee
    // senders close and the export writer can drain out.
    drop(assembler);
    drop(console);
    drop(network);
    drop(performance);
    drop(dom);
    if let Some(task) = export_task {
        sleep(Duration::from_millis(10)).await;
        task.await??;
    }

    println!("\ndemo complete");
    Ok(())
}
