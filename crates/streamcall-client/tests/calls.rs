use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;
use streamcall_client::{ClientConfig, ClientError, StreamCallClient};
use streamcall_core::{
    DeliveryMode, Dispatcher, ErrorCode, FragmentProducer, FragmentStream, GENERATE_PATH,
    ProducerError, Record, ScriptedProducer, encode_record,
};

const FULL_SENTENCE: &str =
    "Per our strategic review, the infrastructure requires urgent remediation.";

async fn start_server(producer: Arc<dyn FragmentProducer>) -> StreamCallClient {
    let (addr, _server) = streamcall_server::spawn_local(Dispatcher::new(producer))
        .await
        .expect("spawn server");
    client_for(addr)
}

fn client_for(addr: SocketAddr) -> StreamCallClient {
    StreamCallClient::new(ClientConfig::new(format!("http://{addr}"))).expect("client")
}

/// Splits the prompt into words and answers with the prompt upper-cased.
struct EchoProducer {
    delay: Duration,
}

#[async_trait::async_trait]
impl FragmentProducer for EchoProducer {
    fn id(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProducerError> {
        tokio::time::sleep(self.delay * 3).await;
        Ok(prompt.to_uppercase())
    }

    async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream, ProducerError> {
        let delay = self.delay;
        let words: Vec<String> = prompt.split_inclusive(' ').map(str::to_string).collect();
        let fragments = stream::iter(words).then(move |word| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, ProducerError>(word)
        });
        let completion = prompt.to_uppercase();
        Ok(FragmentStream {
            fragments: Box::pin(fragments),
            completion: Box::pin(async move { Ok(completion) }),
        })
    }
}

#[tokio::test]
async fn invoke_resolves_with_completion_and_no_fragments() {
    let client = start_server(Arc::new(ScriptedProducer::default())).await;
    let pending = client.invoke("The server is down.").expect("issued");
    assert_eq!(pending.mode(), DeliveryMode::Single);
    let timer = pending.timer();
    let completion = pending.await.expect("completion");
    assert_eq!(completion, FULL_SENTENCE);
    assert!(timer.first_output().is_some());
}

#[tokio::test]
async fn invoke_streaming_yields_fragments_then_full_completion() {
    let producer = ScriptedProducer::default().fragment_delay(Duration::from_millis(10));
    let client = start_server(Arc::new(producer)).await;

    let mut call = client.invoke_streaming("The server is down.").expect("issued");
    assert_eq!(call.completion.mode(), DeliveryMode::Incremental);
    let mut partials = Vec::new();
    while let Some(fragment) = call.fragments.next().await {
        if partials.is_empty() {
            assert!(call.first_output().is_some());
        }
        partials.push(fragment.partial);
    }
    assert_eq!(partials, vec!["Per ", "our ", "strategic review, "]);
    assert_eq!(call.completion.await.expect("completion"), FULL_SENTENCE);
}

#[tokio::test]
async fn both_entry_points_agree_on_the_completion() {
    let client = start_server(Arc::new(EchoProducer {
        delay: Duration::from_millis(1),
    }))
    .await;
    let single = client.invoke("quarterly numbers look fine").expect("issued").await;
    let streaming = client
        .invoke_streaming("quarterly numbers look fine")
        .expect("issued")
        .completion
        .await;
    assert_eq!(single, streaming);
    assert_eq!(single.expect("completion"), "QUARTERLY NUMBERS LOOK FINE");
}

#[tokio::test]
async fn concatenated_fragments_only_grow() {
    let client = start_server(Arc::new(EchoProducer {
        delay: Duration::from_millis(1),
    }))
    .await;
    let prompt = "we are pivoting to synergy";
    let call = client.invoke_streaming(prompt).expect("issued");
    let (fragments, completion) = call.into_parts();
    let partials: Vec<String> = fragments.map(|f| f.partial).collect().await;

    let mut seen = String::new();
    for partial in &partials {
        let before = seen.clone();
        seen.push_str(partial);
        assert!(seen.starts_with(&before));
    }
    assert_eq!(seen, prompt);
    assert_eq!(completion.await.expect("completion"), prompt.to_uppercase());
}

#[tokio::test]
async fn blank_prompt_never_reaches_the_producer() {
    let producer = Arc::new(ScriptedProducer::default());
    let client = start_server(producer.clone()).await;
    for prompt in ["", "   "] {
        let single = client.invoke(prompt).err().expect("rejected");
        assert_eq!(single.code(), Some(ErrorCode::InvalidArgument));
        assert!(matches!(
            client.invoke_streaming(prompt),
            Err(ClientError::InvalidInput(_))
        ));
    }
    assert_eq!(producer.calls(), 0);
}

#[tokio::test]
async fn producer_failure_after_two_fragments_rejects_completion() {
    let producer = ScriptedProducer::new(["Per ", "our ", "strategic review, "])
        .fail_after(2, ProducerError::provider("scripted", "model overloaded", Some(503)));
    let client = start_server(Arc::new(producer)).await;

    let mut call = client.invoke_streaming("The server is down.").expect("issued");
    let mut partials = Vec::new();
    while let Some(fragment) = call.fragments.next_fragment().await {
        partials.push(fragment.partial);
    }
    assert_eq!(partials, vec!["Per ", "our "]);
    match call.completion.await {
        Err(ClientError::Remote(err)) => {
            assert_eq!(err.code, ErrorCode::Internal);
            assert_eq!(err.message, "model overloaded");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn final_text_failure_after_all_fragments_rejects_completion() {
    let producer = ScriptedProducer::new(["Per ", "our "])
        .fail_completion(ProducerError::protocol("scripted", "no final text"));
    let client = start_server(Arc::new(producer)).await;

    let call = client.invoke_streaming("The server is down.").expect("issued");
    let (fragments, completion) = call.into_parts();
    let partials: Vec<String> = fragments.map(|f| f.partial).collect().await;
    assert_eq!(partials, vec!["Per ", "our "]);
    match completion.await {
        Err(ClientError::Remote(err)) => {
            assert_eq!(err.code, ErrorCode::Internal);
            assert_eq!(err.message, "no final text");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn completion_settles_without_consuming_fragments() {
    let producer = ScriptedProducer::default().fragment_delay(Duration::from_millis(5));
    let client = start_server(Arc::new(producer)).await;

    let untouched = client.invoke_streaming("The server is down.").expect("issued");
    assert_eq!(untouched.completion.await.expect("completion"), FULL_SENTENCE);

    let (fragments, completion) = client
        .invoke_streaming("The server is down.")
        .expect("issued")
        .into_parts();
    drop(fragments);
    assert_eq!(completion.await.expect("completion"), FULL_SENTENCE);
}

#[tokio::test]
async fn concurrent_calls_do_not_cross_talk() {
    let client = start_server(Arc::new(EchoProducer {
        delay: Duration::from_millis(20),
    }))
    .await;

    let single = client.invoke("the server is down").expect("issued");
    let mut streaming = client.invoke_streaming("revenue is up").expect("issued");
    assert_ne!(single.call_id(), streaming.completion.call_id());
    let single_timer = single.timer();

    let (single_result, streamed) = tokio::join!(single, async {
        let mut partials = Vec::new();
        while let Some(fragment) = streaming.fragments.next().await {
            partials.push(fragment.partial);
        }
        (partials.concat(), streaming.first_output())
    });

    assert_eq!(single_result.expect("single"), "THE SERVER IS DOWN");
    assert_eq!(streamed.0, "revenue is up");
    let streaming_first = streamed.1.expect("streaming first output");
    let single_first = single_timer.first_output().expect("single first output");
    // The single call only observes output once all three words are produced.
    assert!(streaming_first < single_first);
    assert_eq!(
        streaming.completion.await.expect("streaming"),
        "REVENUE IS UP"
    );
}

#[tokio::test]
async fn cancel_ends_fragments_and_rejects_completion() {
    let producer = ScriptedProducer::new((0..200).map(|i| format!("{i} ")))
        .fragment_delay(Duration::from_millis(20));
    let client = start_server(Arc::new(producer)).await;

    let mut call = client.invoke_streaming("The server is down.").expect("issued");
    let first = call.fragments.next().await.expect("first fragment");
    assert_eq!(first.partial, "0 ");

    call.cancel_handle().cancel();
    let rest: Vec<_> = tokio::time::timeout(Duration::from_secs(2), call.fragments.collect::<Vec<_>>())
        .await
        .expect("fragments end after cancel");
    assert!(rest.len() < 199);
    assert_eq!(call.completion.await, Err(ClientError::Cancelled));
}

/// Serves canned body chunks on the generate path, one every few
/// milliseconds so each chunk is flushed before the next is polled.
async fn start_raw_server(body: Vec<Result<bytes::Bytes, std::io::Error>>) -> SocketAddr {
    use axum::body::Body;
    use axum::routing::post;

    let body = Arc::new(std::sync::Mutex::new(Some(body)));
    let app = axum::Router::new().route(
        GENERATE_PATH,
        post(move || {
            let body = body.clone();
            async move {
                let chunks = body.lock().ok().and_then(|mut b| b.take()).unwrap_or_default();
                Body::from_stream(stream::iter(chunks).then(|chunk| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    chunk
                }))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

#[tokio::test]
async fn dropped_connection_is_a_transport_error_not_a_remote_error() {
    let addr = start_raw_server(vec![
        Ok(encode_record(&Record::fragment("Per "))),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "upstream reset")),
    ])
    .await;
    let client = client_for(addr);

    let mut call = client.invoke_streaming("The server is down.").expect("issued");
    let mut partials = Vec::new();
    while let Some(fragment) = call.fragments.next().await {
        partials.push(fragment.partial);
    }
    assert_eq!(partials, vec!["Per "]);
    assert!(matches!(call.completion.await, Err(ClientError::Transport(_))));
}

#[tokio::test]
async fn stream_without_terminal_record_is_a_transport_error() {
    let addr = start_raw_server(vec![Ok::<_, std::io::Error>(encode_record(
        &Record::fragment("Per "),
    ))])
    .await;
    let client = client_for(addr);
    let completion = client
        .invoke_streaming("The server is down.")
        .expect("issued")
        .completion
        .await;
    assert!(matches!(completion, Err(ClientError::Transport(msg)) if msg.contains("without a terminal record")));
}
