// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use digest::{Digest, DigestFunction, InstanceName};
use parking_lot::Mutex;
use prost::Message;
use protos::build::bazel::remote::execution::v2::ActionResult;
use tonic::{Code, Status};

use super::{Buffer, ChunkReader, ErrorHandler, ReaderAt, Source};

const HELLO_MD5: &str = "8b1a9953c4611296a827abf8c47804d7";
const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

fn md5_digest(hash: &str, size_bytes: i64) -> Digest {
    Digest::new(InstanceName::EMPTY, DigestFunction::Md5, hash, size_bytes).unwrap()
}

fn digest_of(content: &[u8]) -> Digest {
    Digest::of_bytes(InstanceName::EMPTY, DigestFunction::Md5, content).unwrap()
}

fn recording_source(calls: &Arc<Mutex<Vec<bool>>>) -> Source {
    let calls = calls.clone();
    Source::backend_provided(Box::new(move |valid| calls.lock().push(valid)))
}

fn stream_of(chunks: Vec<Result<Bytes, Status>>) -> super::BoxReadStream {
    Box::pin(tokio_stream::iter(chunks))
}

struct TestErrorHandler {
    replacements: VecDeque<Result<Buffer, Status>>,
    on_error_calls: Arc<AtomicUsize>,
    done_calls: Arc<AtomicUsize>,
}

impl TestErrorHandler {
    fn new(
        replacements: Vec<Result<Buffer, Status>>,
        on_error_calls: &Arc<AtomicUsize>,
        done_calls: &Arc<AtomicUsize>,
    ) -> Box<Self> {
        Box::new(TestErrorHandler {
            replacements: replacements.into(),
            on_error_calls: on_error_calls.clone(),
            done_calls: done_calls.clone(),
        })
    }
}

impl ErrorHandler for TestErrorHandler {
    fn on_error(&mut self, status: Status) -> Result<Buffer, Status> {
        self.on_error_calls.fetch_add(1, Ordering::SeqCst);
        match self.replacements.pop_front() {
            Some(replacement) => replacement,
            None => Err(status),
        }
    }

    fn done(&mut self) {
        self.done_calls.fetch_add(1, Ordering::SeqCst);
    }
}

async fn collect(mut reader: Box<dyn ChunkReader>) -> Result<Vec<Bytes>, Status> {
    let mut chunks = Vec::new();
    loop {
        match reader.read().await {
            Ok(Some(chunk)) => chunks.push(chunk),
            Ok(None) => break,
            Err(err) => {
                reader.close().await;
                return Err(err);
            }
        }
    }
    reader.close().await;
    Ok(chunks)
}

// ---------------------------------------------------------------------------
// Validated byte slices and Protobuf messages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validated_bytes_round_trip() {
    let buffer = Buffer::new_validated_buffer_from_bytes(Bytes::from_static(b"Hello"));
    assert_eq!(buffer.size_bytes().unwrap(), 5);
    assert_eq!(
        buffer.to_bytes(5).await.unwrap(),
        Bytes::from_static(b"Hello")
    );
}

#[tokio::test]
async fn size_cap_is_invalid_argument() {
    let buffer = Buffer::new_validated_buffer_from_bytes(Bytes::from_static(b"Hello"));
    let err = buffer.to_bytes(4).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(
        err.message(),
        "Buffer is 5 bytes in size, while a maximum of 4 bytes is permitted"
    );
}

#[tokio::test]
async fn cas_stream_size_cap_checked_before_reading() {
    // The stream would yield an error if anyone read it; the cap must be
    // enforced from the declared size without touching the stream.
    let digest = md5_digest(HELLO_MD5, 5);
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![Err(Status::internal("must not be read"))]),
        Source::user_provided(),
    );
    let err = buffer.to_bytes(4).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(
        err.message(),
        "Buffer is 5 bytes in size, while a maximum of 4 bytes is permitted"
    );
}

#[tokio::test]
async fn proto_message_round_trip() {
    let action_result = ActionResult {
        exit_code: 42,
        ..Default::default()
    };
    let marshaled = Bytes::from(action_result.encode_to_vec());

    let buffer =
        Buffer::new_proto_buffer_from_message(action_result.clone(), Source::user_provided());
    let decoded: ActionResult = buffer.to_proto(1024).await.unwrap();
    assert_eq!(decoded, action_result);

    let buffer = Buffer::new_proto_buffer_from_bytes::<ActionResult>(
        marshaled.clone(),
        Source::user_provided(),
    );
    assert_eq!(buffer.to_bytes(1024).await.unwrap(), marshaled);
}

#[tokio::test]
async fn proto_buffer_from_malformed_bytes() {
    // "Hello world" is not a valid ActionResult message.
    let calls = Arc::new(Mutex::new(Vec::new()));
    let buffer = Buffer::new_proto_buffer_from_bytes::<ActionResult>(
        Bytes::from_static(b"Hello world"),
        recording_source(&calls),
    );
    let err = buffer.to_proto::<ActionResult>(1024).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert!(err.message().starts_with("Failed to unmarshal message:"));
    assert_eq!(*calls.lock(), vec![false]);
}

// ---------------------------------------------------------------------------
// CAS byte slices
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cas_bytes_valid() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let buffer = Buffer::new_cas_buffer_from_bytes(
        &md5_digest(HELLO_MD5, 5),
        Bytes::from_static(b"Hello"),
        recording_source(&calls),
    );
    assert_eq!(
        buffer.to_bytes(10).await.unwrap(),
        Bytes::from_static(b"Hello")
    );
    assert_eq!(*calls.lock(), vec![true]);
}

#[tokio::test]
async fn cas_bytes_size_mismatch() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let buffer = Buffer::new_cas_buffer_from_bytes(
        &md5_digest(HELLO_MD5, 6),
        Bytes::from_static(b"Hello"),
        recording_source(&calls),
    );
    let err = buffer.to_bytes(10).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(
        err.message(),
        "Buffer is 5 bytes in size, while 6 bytes were expected"
    );
    assert_eq!(*calls.lock(), vec![false]);
}

#[tokio::test]
async fn cas_bytes_hash_mismatch() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let buffer = Buffer::new_cas_buffer_from_bytes(
        &md5_digest(EMPTY_MD5, 5),
        Bytes::from_static(b"Hello"),
        recording_source(&calls),
    );
    let err = buffer.to_bytes(10).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(
        err.message(),
        format!("Buffer has checksum {HELLO_MD5}, while {EMPTY_MD5} was expected")
    );
    assert_eq!(*calls.lock(), vec![false]);
}

#[tokio::test]
async fn cas_bytes_user_provided_mismatch_is_invalid_argument() {
    let buffer = Buffer::new_cas_buffer_from_bytes(
        &md5_digest(HELLO_MD5, 6),
        Bytes::from_static(b"Hello"),
        Source::user_provided(),
    );
    let err = buffer.to_bytes(10).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

// ---------------------------------------------------------------------------
// CAS streams
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cas_stream_round_trip() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let digest = digest_of(b"Hello world");
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Ok(Bytes::from_static(b"world")),
        ]),
        recording_source(&calls),
    );
    assert_eq!(
        buffer.to_bytes(100).await.unwrap(),
        Bytes::from_static(b"Hello world")
    );
    assert_eq!(*calls.lock(), vec![true]);
}

#[tokio::test]
async fn cas_stream_zero_length_blob() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let digest = md5_digest(EMPTY_MD5, 0);
    let buffer =
        Buffer::new_cas_buffer_from_stream(&digest, stream_of(vec![]), recording_source(&calls));
    assert_eq!(buffer.to_bytes(100).await.unwrap(), Bytes::new());
    assert_eq!(*calls.lock(), vec![true]);
}

#[tokio::test]
async fn cas_stream_into_writer() {
    let digest = digest_of(b"Hello world");
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Ok(Bytes::from_static(b"world")),
        ]),
        Source::user_provided(),
    );
    let mut writer = Vec::new();
    buffer.into_writer(&mut writer).await.unwrap();
    assert_eq!(writer, b"Hello world");
}

#[tokio::test]
async fn cas_stream_into_writer_reports_integrity_error() {
    let buffer = Buffer::new_cas_buffer_from_stream(
        &md5_digest(HELLO_MD5, 5),
        stream_of(vec![Ok(Bytes::from_static(b"Hellp"))]),
        Source::user_provided(),
    );
    let mut writer = Vec::new();
    let err = buffer.into_writer(&mut writer).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    // The corrupt bytes were already emitted before the mismatch could be
    // detected; the caller must treat the sink contents as tainted.
    assert_eq!(writer, b"Hellp");
}

#[tokio::test]
async fn to_chunk_reader_normalizes_chunks() {
    let digest = digest_of(b"0123456789ab");
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![Ok(Bytes::from_static(b"0123456789ab"))]),
        Source::user_provided(),
    );
    let chunks = collect(buffer.to_chunk_reader(0, 5)).await.unwrap();
    assert_eq!(
        chunks,
        vec![
            Bytes::from_static(b"01234"),
            Bytes::from_static(b"56789"),
            Bytes::from_static(b"ab"),
        ]
    );
}

#[tokio::test]
async fn to_chunk_reader_skips_to_offset() {
    let digest = digest_of(b"Hello world");
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Ok(Bytes::from_static(b"world")),
        ]),
        Source::user_provided(),
    );
    let chunks = collect(buffer.to_chunk_reader(4, 100)).await.unwrap();
    assert_eq!(
        chunks,
        vec![Bytes::from_static(b"o "), Bytes::from_static(b"world")]
    );
}

#[tokio::test]
async fn to_chunk_reader_at_exact_end() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let digest = digest_of(b"Hello");
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![Ok(Bytes::from_static(b"Hello"))]),
        recording_source(&calls),
    );
    let chunks = collect(buffer.to_chunk_reader(5, 100)).await.unwrap();
    assert!(chunks.is_empty());
    // The whole blob still passed through validation.
    assert_eq!(*calls.lock(), vec![true]);
}

#[tokio::test]
async fn to_chunk_reader_rejects_bad_offsets() {
    let digest = digest_of(b"Hello");
    for offset in [-1, 6] {
        let buffer = Buffer::new_cas_buffer_from_stream(
            &digest,
            stream_of(vec![Ok(Bytes::from_static(b"Hello"))]),
            Source::user_provided(),
        );
        let err = collect(buffer.to_chunk_reader(offset, 100))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }
}

#[tokio::test]
async fn to_stream_round_trip() {
    use futures::TryStreamExt;

    let digest = digest_of(b"Hello world");
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Ok(Bytes::from_static(b"world")),
        ]),
        Source::user_provided(),
    );
    let chunks: Vec<_> = buffer.to_stream().try_collect().await.unwrap();
    assert_eq!(
        chunks,
        vec![Bytes::from_static(b"Hello "), Bytes::from_static(b"world")]
    );
}

// ---------------------------------------------------------------------------
// read_at
// ---------------------------------------------------------------------------

#[tokio::test]
async fn read_at_window_on_stream_buffer() {
    let digest = digest_of(b"Hello world");
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Ok(Bytes::from_static(b"world")),
        ]),
        Source::user_provided(),
    );
    let mut buf = [0u8; 5];
    let n = buffer.read_at(&mut buf, 6).await.unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf, b"world");
}

#[tokio::test]
async fn read_at_validates_the_whole_blob() {
    // The window itself is intact; the corruption is past it. The read must
    // still fail, because the blob as a whole does not match its digest.
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest_of(b"Hello world"),
        stream_of(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Ok(Bytes::from_static(b"wxrld")),
        ]),
        Source::user_provided(),
    );
    let mut buf = [0u8; 5];
    let err = buffer.read_at(&mut buf, 0).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn read_at_boundaries() {
    let data = Bytes::from_static(b"Hello");

    // Exactly at the end: zero bytes, no error.
    let buffer = Buffer::new_validated_buffer_from_bytes(data.clone());
    let mut buf = [0u8; 5];
    assert_eq!(buffer.read_at(&mut buf, 5).await.unwrap(), 0);

    // Beyond the end.
    let buffer = Buffer::new_validated_buffer_from_bytes(data.clone());
    let err = buffer.read_at(&mut buf, 6).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    // Negative offset.
    let buffer = Buffer::new_validated_buffer_from_bytes(data.clone());
    let err = buffer.read_at(&mut buf, -1).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    // Short read at the tail.
    let buffer = Buffer::new_validated_buffer_from_bytes(data);
    let n = buffer.read_at(&mut buf, 3).await.unwrap();
    assert_eq!(n, 2);
    assert_eq!(&buf[..2], b"lo");
}

// ---------------------------------------------------------------------------
// Random-access readers
// ---------------------------------------------------------------------------

struct BytesReaderAt {
    data: Bytes,
}

impl ReaderAt for BytesReaderAt {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, Status> {
        let begin = (offset as usize).min(self.data.len());
        let count = buf.len().min(self.data.len() - begin);
        buf[..count].copy_from_slice(&self.data[begin..begin + count]);
        Ok(count)
    }
}

#[tokio::test]
async fn reader_at_buffer_supports_concurrent_clones() {
    let digest = digest_of(b"Hello world");
    let reader = Arc::new(BytesReaderAt {
        data: Bytes::from_static(b"Hello world"),
    });
    let buffer = Buffer::new_cas_buffer_from_reader_at(&digest, reader);
    let (b1, b2) = buffer.clone_copy(100).await;

    let task1 = tokio::spawn(async move {
        let mut buf = [0u8; 5];
        let n = b1.read_at(&mut buf, 0).await.unwrap();
        (n, buf)
    });
    let task2 = tokio::spawn(async move {
        let mut buf = [0u8; 5];
        let n = b2.read_at(&mut buf, 6).await.unwrap();
        (n, buf)
    });
    let (n1, buf1) = task1.await.unwrap();
    let (n2, buf2) = task2.await.unwrap();
    assert_eq!((n1, &buf1[..]), (5, b"Hello".as_slice()));
    assert_eq!((n2, &buf2[..]), (5, b"world".as_slice()));
}

#[tokio::test]
async fn reader_at_buffer_to_bytes() {
    let digest = digest_of(b"Hello world");
    let reader = Arc::new(BytesReaderAt {
        data: Bytes::from_static(b"Hello world"),
    });
    let buffer = Buffer::new_cas_buffer_from_reader_at(&digest, reader);
    assert_eq!(
        buffer.to_bytes(100).await.unwrap(),
        Bytes::from_static(b"Hello world")
    );
}

// ---------------------------------------------------------------------------
// Error buffers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn error_buffer_surfaces_error_everywhere() {
    let status = Status::not_found("Blob not found");

    let buffer = Buffer::new_buffer_with_error(status.clone());
    assert_eq!(buffer.size_bytes().unwrap_err().code(), Code::NotFound);
    assert_eq!(buffer.to_bytes(10).await.unwrap_err().code(), Code::NotFound);

    let buffer = Buffer::new_buffer_with_error(status.clone());
    let err = buffer.to_proto::<ActionResult>(10).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let buffer = Buffer::new_buffer_with_error(status.clone());
    let err = collect(buffer.to_chunk_reader(0, 10)).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let buffer = Buffer::new_buffer_with_error(status);
    buffer.discard().await;
}

#[tokio::test]
async fn read_at_on_error_buffer_reports_the_held_error() {
    // The buffer's own error wins over offset validation.
    let mut buf = [0u8; 5];
    for offset in [-1, 0, 1000] {
        let buffer = Buffer::new_buffer_with_error(Status::not_found("no such blob"));
        let err = buffer.read_at(&mut buf, offset).await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }
}

#[tokio::test]
async fn error_buffer_clone_copy() {
    let buffer = Buffer::new_buffer_with_error(Status::internal("boom"));
    let (b1, b2) = buffer.clone_copy(10).await;
    assert_eq!(b1.to_bytes(10).await.unwrap_err().code(), Code::Internal);
    assert_eq!(b2.to_bytes(10).await.unwrap_err().code(), Code::Internal);
}

// ---------------------------------------------------------------------------
// clone_copy / clone_stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clone_copy_of_stream_buffer_yields_equal_contents() {
    let digest = digest_of(b"Hello world");
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Ok(Bytes::from_static(b"world")),
        ]),
        Source::user_provided(),
    );
    let (b1, b2) = buffer.clone_copy(100).await;
    assert_eq!(
        b1.to_bytes(100).await.unwrap(),
        Bytes::from_static(b"Hello world")
    );
    assert_eq!(
        b2.to_bytes(100).await.unwrap(),
        Bytes::from_static(b"Hello world")
    );
}

#[tokio::test]
async fn clone_stream_of_stream_buffer() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let digest = digest_of(b"Hello world");
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Ok(Bytes::from_static(b"world")),
        ]),
        recording_source(&calls),
    );
    let (b1, b2) = buffer.clone_stream();

    // Each clone must be driven from its own task.
    let task1 = tokio::spawn(b1.to_bytes(100));
    let task2 = tokio::spawn(async move {
        let mut writer = Vec::new();
        b2.into_writer(&mut writer).await.map(|()| writer)
    });
    assert_eq!(
        task1.await.unwrap().unwrap(),
        Bytes::from_static(b"Hello world")
    );
    assert_eq!(task2.await.unwrap().unwrap(), b"Hello world");

    // The underlying stream was read and validated once.
    assert_eq!(*calls.lock(), vec![true]);
}

#[tokio::test]
async fn clone_stream_discarded_half() {
    let digest = digest_of(b"Hello world");
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Ok(Bytes::from_static(b"world")),
        ]),
        Source::user_provided(),
    );
    let (b1, b2) = buffer.clone_stream();
    b2.discard().await;
    assert_eq!(
        b1.to_bytes(100).await.unwrap(),
        Bytes::from_static(b"Hello world")
    );
}

#[tokio::test]
async fn clone_stream_of_task_wrapped_error_buffer() {
    // The wrapper has no declared size to multiplex under; both clones
    // surface the held error rather than pretending to be empty.
    let buffer = Buffer::new_buffer_with_error(Status::not_found("no such blob"))
        .with_task(async { Ok(()) });
    let (b1, b2) = buffer.clone_stream();
    assert_eq!(b1.to_bytes(10).await.unwrap_err().code(), Code::NotFound);
    assert_eq!(b2.to_bytes(10).await.unwrap_err().code(), Code::NotFound);
}

#[tokio::test]
async fn clone_stream_of_validated_bytes_shares_storage() {
    let buffer = Buffer::new_validated_buffer_from_bytes(Bytes::from_static(b"Hello"));
    let (b1, b2) = buffer.clone_stream();
    assert_eq!(b1.to_bytes(5).await.unwrap(), Bytes::from_static(b"Hello"));
    assert_eq!(b2.to_bytes(5).await.unwrap(), Bytes::from_static(b"Hello"));
}

// ---------------------------------------------------------------------------
// Error handlers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn error_handler_on_error_buffer_substitutes_immediately() {
    let on_error_calls = Arc::new(AtomicUsize::new(0));
    let done_calls = Arc::new(AtomicUsize::new(0));
    let handler = TestErrorHandler::new(
        vec![Ok(Buffer::new_validated_buffer_from_bytes(
            Bytes::from_static(b"Hello"),
        ))],
        &on_error_calls,
        &done_calls,
    );

    let buffer = Buffer::new_buffer_with_error(Status::unavailable("backend down"));
    let buffer = buffer.with_error_handler(handler);
    assert_eq!(
        buffer.to_bytes(10).await.unwrap(),
        Bytes::from_static(b"Hello")
    );
    assert_eq!(on_error_calls.load(Ordering::SeqCst), 1);
    assert_eq!(done_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn error_handler_translates_error() {
    let on_error_calls = Arc::new(AtomicUsize::new(0));
    let done_calls = Arc::new(AtomicUsize::new(0));
    let handler = TestErrorHandler::new(
        vec![Err(Status::not_found("relabeled"))],
        &on_error_calls,
        &done_calls,
    );

    let buffer = Buffer::new_buffer_with_error(Status::unavailable("backend down"));
    let err = buffer.with_error_handler(handler).to_bytes(10).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert_eq!(on_error_calls.load(Ordering::SeqCst), 1);
    assert_eq!(done_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn error_handler_whole_call_retry() {
    let on_error_calls = Arc::new(AtomicUsize::new(0));
    let done_calls = Arc::new(AtomicUsize::new(0));
    let digest = digest_of(b"Hello");
    let handler = TestErrorHandler::new(
        vec![Ok(Buffer::new_cas_buffer_from_bytes(
            &digest,
            Bytes::from_static(b"Hello"),
            Source::user_provided(),
        ))],
        &on_error_calls,
        &done_calls,
    );

    // The first buffer fails before producing any bytes, so the operation is
    // retried whole against the replacement.
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![Err(Status::unavailable("backend down"))]),
        Source::user_provided(),
    );
    let data = buffer.with_error_handler(handler).to_bytes(10).await.unwrap();
    assert_eq!(data, Bytes::from_static(b"Hello"));
    assert_eq!(on_error_calls.load(Ordering::SeqCst), 1);
    assert_eq!(done_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn error_handler_resumes_stream_at_current_offset() {
    // The first source yields "Hello " and fails. The replacement holds
    // different leading bytes, but resumption starts at the current offset,
    // so the bytes actually observed are "Hello " + "world".
    let on_error_calls = Arc::new(AtomicUsize::new(0));
    let done_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let digest = digest_of(b"Hello world");

    let handler = TestErrorHandler::new(
        vec![Ok(Buffer::new_validated_buffer_from_bytes(
            Bytes::from_static(b"XXXXXXworld"),
        ))],
        &on_error_calls,
        &done_calls,
    );
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Err(Status::unavailable("connection reset")),
        ]),
        recording_source(&calls),
    );

    let mut writer = Vec::new();
    buffer
        .with_error_handler(handler)
        .into_writer(&mut writer)
        .await
        .unwrap();
    assert_eq!(writer, b"Hello world");
    assert_eq!(on_error_calls.load(Ordering::SeqCst), 1);
    assert_eq!(done_calls.load(Ordering::SeqCst), 1);
    // Validation covered the concatenation of both sources.
    assert_eq!(*calls.lock(), vec![true]);
}

#[tokio::test]
async fn error_handler_cannot_rescue_checksum_failure_mid_stream() {
    // The replacement resumes cleanly, but the concatenated contents do not
    // match the digest. The final checksum failure is not offered to the
    // handler; it is terminal.
    let on_error_calls = Arc::new(AtomicUsize::new(0));
    let done_calls = Arc::new(AtomicUsize::new(0));
    let digest = digest_of(b"Hello world");

    let handler = TestErrorHandler::new(
        vec![Ok(Buffer::new_validated_buffer_from_bytes(
            Bytes::from_static(b"XXXXXXwxrld"),
        ))],
        &on_error_calls,
        &done_calls,
    );
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Err(Status::unavailable("connection reset")),
        ]),
        Source::user_provided(),
    );

    let mut writer = Vec::new();
    let err = buffer
        .with_error_handler(handler)
        .into_writer(&mut writer)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(on_error_calls.load(Ordering::SeqCst), 1);
    assert_eq!(done_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn error_handler_on_clean_buffer_completes_immediately() {
    let on_error_calls = Arc::new(AtomicUsize::new(0));
    let done_calls = Arc::new(AtomicUsize::new(0));
    let handler = TestErrorHandler::new(vec![], &on_error_calls, &done_calls);

    let buffer = Buffer::new_validated_buffer_from_bytes(Bytes::from_static(b"Hello"));
    let buffer = buffer.with_error_handler(handler);
    assert_eq!(
        buffer.to_bytes(10).await.unwrap(),
        Bytes::from_static(b"Hello")
    );
    assert_eq!(on_error_calls.load(Ordering::SeqCst), 0);
    assert_eq!(done_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn error_handler_done_fires_on_discard() {
    let on_error_calls = Arc::new(AtomicUsize::new(0));
    let done_calls = Arc::new(AtomicUsize::new(0));
    let handler = TestErrorHandler::new(vec![], &on_error_calls, &done_calls);

    let digest = digest_of(b"Hello");
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![Ok(Bytes::from_static(b"Hello"))]),
        Source::user_provided(),
    );
    buffer.with_error_handler(handler).discard().await;
    assert_eq!(done_calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn with_task_success() {
    let finished = Arc::new(AtomicBool::new(false));
    let finished2 = finished.clone();
    let buffer = Buffer::new_validated_buffer_from_bytes(Bytes::from_static(b"Hello"))
        .with_task(async move {
            finished2.store(true, Ordering::SeqCst);
            Ok(())
        });
    assert_eq!(
        buffer.to_bytes(10).await.unwrap(),
        Bytes::from_static(b"Hello")
    );
    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn with_task_error_surfaces_after_successful_read() {
    let buffer = Buffer::new_validated_buffer_from_bytes(Bytes::from_static(b"Hello"))
        .with_task(async { Err(Status::internal("replication failed")) });
    let err = buffer.to_bytes(10).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(err.message(), "replication failed");
}

#[tokio::test]
async fn with_task_foreground_error_wins() {
    let buffer = Buffer::new_buffer_with_error(Status::not_found("no such blob"))
        .with_task(async { Err(Status::internal("replication failed")) });
    let err = buffer.to_bytes(10).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn with_task_joined_on_discard() {
    let finished = Arc::new(AtomicBool::new(false));
    let finished2 = finished.clone();
    let buffer = Buffer::new_validated_buffer_from_bytes(Bytes::from_static(b"Hello"))
        .with_task(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            finished2.store(true, Ordering::SeqCst);
            Ok(())
        });
    buffer.discard().await;
    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn with_task_streaming_read() {
    let digest = digest_of(b"Hello");
    let buffer = Buffer::new_cas_buffer_from_stream(
        &digest,
        stream_of(vec![Ok(Bytes::from_static(b"Hello"))]),
        Source::user_provided(),
    )
    .with_task(async { Err(Status::internal("replication failed")) });
    let err = collect(buffer.to_chunk_reader(0, 100)).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
}
