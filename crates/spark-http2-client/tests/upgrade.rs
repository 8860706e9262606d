//! 升级引导：隐式流 #1 与升级器挂钩。

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, Version, header};
use parking_lot::Mutex;
use spark_http2_client::{
    CloseEvent, Failure, FailureKind, HttpChannel, HttpRequest, HttpUpgrader, ResponseMetadata, StreamId,
    UpgradeContext, UpgradeError, UpgraderFactory,
    test_stubs::{Fixture, get_request},
};

fn upgrade_request() -> Arc<HttpRequest> {
    HttpRequest::builder(Method::GET, Uri::from_static("http://localhost/upgrade"))
        .header(header::UPGRADE, HeaderValue::from_static("h2c"))
        .build()
}

#[test]
fn upgrade_binds_implicit_stream_to_new_exchange() {
    let fixture = Fixture::new();
    let request = upgrade_request();
    let context = UpgradeContext::switching_protocols(request.clone());

    let exchange = fixture.connection.upgrade(&context).expect("升级应成功");

    let stream = fixture
        .session
        .stream(StreamId::UPGRADE)
        .expect("会话应创建隐式流 #1");
    let frame = stream.frame().expect("隐式流应携带请求帧");
    assert!(frame.is_end_stream());
    assert_eq!(frame.metadata().method, Method::GET);
    assert_eq!(frame.metadata().uri, *request.uri());
    assert_eq!(frame.metadata().version, Version::HTTP_2);
    assert_eq!(
        frame.metadata().headers.get(header::UPGRADE),
        Some(&HeaderValue::from_static("h2c"))
    );
    assert_eq!(stream.close_updates(), vec![(true, CloseEvent::AfterSend)]);
    assert!(stream.has_listener());

    assert!(exchange.is_request_complete());
    assert!(exchange.is_request_terminated());
    let last = request
        .conversation()
        .last_exchange()
        .expect("新交换应加入会话历史");
    assert!(Arc::ptr_eq(&last, &exchange));

    let channel = fixture
        .channels
        .channel_for(&exchange)
        .expect("交换应绑定到通道");
    assert_eq!(channel.stream().map(|stream| stream.id()), Some(StreamId::UPGRADE));
    assert!(fixture.connection.pool().is_active(channel.id()));

    assert!(stream.deliver_headers(ResponseMetadata::new(StatusCode::OK, HeaderMap::new()), true));
    assert_eq!(
        exchange.response().map(|response| response.status),
        Some(StatusCode::OK)
    );
}

#[test]
fn upgrade_is_one_shot() {
    let fixture = Fixture::new();
    let context = UpgradeContext::switching_protocols(upgrade_request());
    fixture.connection.upgrade(&context).expect("第一次升级应成功");

    let again = fixture.connection.upgrade(&context).map(|_| ());
    assert_eq!(again, Err(UpgradeError::AlreadyUpgraded));
    assert_eq!(fixture.session.streams().len(), 1);
}

#[test]
fn upgraded_exchange_is_aborted_on_close() {
    let fixture = Fixture::new();
    let context = UpgradeContext::new(upgrade_request(), StatusCode::SWITCHING_PROTOCOLS);
    let exchange = fixture.connection.upgrade(&context).expect("升级应成功");

    fixture.connection.close();
    assert!(exchange.request().is_aborted());
}

#[test]
fn close_while_opening_implicit_stream_fails_upgrade() {
    let fixture = Fixture::new();
    let connection = Arc::downgrade(&fixture.connection);
    fixture.session.on_implicit_stream(move || {
        if let Some(connection) = connection.upgrade() {
            connection.close();
        }
    });
    let request = upgrade_request();
    let context = UpgradeContext::switching_protocols(request.clone());

    assert_eq!(
        fixture.connection.upgrade(&context).map(|_| ()),
        Err(UpgradeError::ConnectionClosed)
    );
    assert_eq!(
        request.abort_cause().map(Failure::kind),
        Some(FailureKind::ConnectionClosed)
    );
    let created = fixture.channels.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].destroy_count(), 1);
    assert_eq!(fixture.connection.pool().active_len(), 0);
    assert_eq!(fixture.connection.pool().idle_len(), 0);
}

#[test]
fn close_after_binding_upgrade_exchange_destroys_channel() {
    let fixture = Fixture::new();
    fixture.channels.on_associate(|connection| {
        connection.close_with(Failure::transport_abort("closed mid-upgrade"));
    });
    let request = upgrade_request();
    let context = UpgradeContext::switching_protocols(request.clone());

    assert_eq!(
        fixture.connection.upgrade(&context).map(|_| ()),
        Err(UpgradeError::ConnectionClosed)
    );
    assert_eq!(
        request.abort_cause().map(Failure::message),
        Some("closed mid-upgrade")
    );
    let stream = fixture
        .session
        .stream(StreamId::UPGRADE)
        .expect("隐式流已创建");
    assert!(!stream.has_listener(), "被摘走的通道不应接管隐式流");
    let created = fixture.channels.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].destroy_count(), 1);
    assert_eq!(fixture.connection.pool().active_len(), 0);
}

#[derive(Default)]
struct RecordingUpgraders {
    versions: Mutex<Vec<Version>>,
    prepared: Arc<AtomicUsize>,
}

struct CountingUpgrader {
    prepared: Arc<AtomicUsize>,
}

impl HttpUpgrader for CountingUpgrader {
    fn prepare(&self, _request: &HttpRequest) {
        self.prepared.fetch_add(1, Ordering::AcqRel);
    }
}

impl UpgraderFactory for RecordingUpgraders {
    fn new_upgrader(&self, version: Version) -> Arc<dyn HttpUpgrader> {
        self.versions.lock().push(version);
        Arc::new(CountingUpgrader {
            prepared: self.prepared.clone(),
        })
    }
}

#[test]
fn send_installs_upgrader_on_conversation() {
    let fixture = Fixture::new();
    let upgraders = Arc::new(RecordingUpgraders::default());
    let request = HttpRequest::builder(Method::GET, Uri::from_static("http://localhost/ws"))
        .upgrader(upgraders.clone())
        .build();
    let exchange = spark_http2_client::HttpExchange::new(request.clone());

    fixture.connection.send(exchange).expect("发送应成功");

    assert_eq!(*upgraders.versions.lock(), vec![Version::HTTP_2]);
    assert_eq!(upgraders.prepared.load(Ordering::Acquire), 1);
    assert!(request.conversation().upgrader().is_some());
}

#[test]
fn plain_send_leaves_conversation_without_upgrader() {
    let fixture = Fixture::new();
    let request = get_request("/plain");
    fixture
        .connection
        .send(spark_http2_client::HttpExchange::new(request.clone()))
        .expect("发送应成功");
    assert!(request.conversation().upgrader().is_none());
}
