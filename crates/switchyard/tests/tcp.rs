use core::time::Duration;
use switchyard::transport::{Context, Endpoint, EndpointOptions};
use switchyard_core::{Error, Frame, Identity, Message, SocketType};
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

fn quick_reconnect() -> EndpointOptions {
    EndpointOptions {
        reconnect_interval: Duration::from_millis(20),
        ..EndpointOptions::default()
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition within deadline");
}

async fn receive(endpoint: &mut Endpoint) -> Message {
    timeout(WAIT, endpoint.receive())
        .await
        .expect("message within deadline")
        .unwrap()
}

async fn bound(ctx: &Context, kind: SocketType) -> (Endpoint, String) {
    let mut endpoint = ctx.socket(kind);
    endpoint.bind("tcp://127.0.0.1:0").await.unwrap();
    let address = endpoint.last_endpoint().unwrap().to_string();
    (endpoint, address)
}

#[tokio::test]
async fn connector_retries_until_the_listener_appears() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let address = format!("tcp://127.0.0.1:{port}");

    let ctx = Context::new();
    let mut dealer = ctx.socket_with(SocketType::Dealer, quick_reconnect());
    dealer.set_identity(Identity::from("AAAA-0001")).unwrap();
    dealer.connect(&address).await.unwrap();
    sleep(Duration::from_millis(60)).await;
    assert_eq!(dealer.peer_count(), 0);

    let mut router = ctx.socket(SocketType::Router);
    router.bind(&address).await.unwrap();

    timeout(WAIT, dealer.send(Message::from("hi")))
        .await
        .expect("send once connected")
        .unwrap();
    assert_eq!(
        receive(&mut router).await.frames(),
        &[Frame::from("AAAA-0001"), Frame::from("hi")]
    );

    router
        .send(Message::new(vec![Frame::from("AAAA-0001"), Frame::from("hello")]).unwrap())
        .await
        .unwrap();
    assert_eq!(receive(&mut dealer).await, Message::from("hello"));
}

#[tokio::test]
async fn binding_an_address_in_use_fails() {
    let ctx = Context::new();
    let (_first, address) = bound(&ctx, SocketType::Router).await;

    let mut second = ctx.socket(SocketType::Router);
    let err = second.bind(&address).await.unwrap_err();
    assert!(matches!(err, Error::AddressError { .. }), "{err}");
    assert_eq!(second.last_endpoint(), None);
}

#[tokio::test]
async fn incompatible_peer_is_never_attached() {
    let ctx = Context::new();
    let (mut router, address) = bound(&ctx, SocketType::Router).await;

    let timeout_after = Duration::from_millis(100);
    let mut push = ctx.socket_with(
        SocketType::Push,
        EndpointOptions {
            send_timeout: Some(timeout_after),
            ..quick_reconnect()
        },
    );
    push.connect(&address).await.unwrap();
    assert_eq!(
        push.send(Message::from("wrong door")).await,
        Err(Error::SendTimeout {
            timeout: timeout_after
        })
    );
    assert_eq!(router.peer_count(), 0);
    assert_eq!(push.peer_count(), 0);

    let mut dealer = ctx.socket(SocketType::Dealer);
    dealer.set_identity(Identity::from("AAAA-0002")).unwrap();
    dealer.connect(&address).await.unwrap();
    eventually(|| router.peer_count() == 1).await;

    dealer.send(Message::from("right door")).await.unwrap();
    assert_eq!(
        receive(&mut router).await.frames(),
        &[Frame::from("AAAA-0002"), Frame::from("right door")]
    );
    assert_eq!(router.peer_count(), 1);
}

#[tokio::test]
async fn subscriber_filters_what_the_publisher_sends() {
    let ctx = Context::new();
    let (mut publisher, address) = bound(&ctx, SocketType::Publisher).await;

    let mut subscriber = ctx.socket(SocketType::Subscriber);
    subscriber.subscribe("weather").unwrap();
    subscriber.connect(&address).await.unwrap();
    eventually(|| publisher.peer_count() == 1).await;

    publisher.send(Message::from("sports: none")).await.unwrap();
    publisher.send(Message::from("weather: rain")).await.unwrap();
    assert_eq!(
        receive(&mut subscriber).await,
        Message::from("weather: rain")
    );
    assert_eq!(subscriber.queued(), 0);
}
