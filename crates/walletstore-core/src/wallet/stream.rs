use tokio::sync::mpsc;

/// Finite, unordered stream of decrypted records produced by a bulk retrieval.
///
/// The stream ends once every fetch has been accounted for. Dropping it, or
/// calling [`RecordStream::close`], tells the producer to stop issuing requests.
#[derive(Debug)]
pub struct RecordStream {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl RecordStream {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// A stream that yields nothing.
    pub fn empty() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self { rx }
    }

    /// Next record in completion order, or `None` when the retrieval is finished.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Stop the producer from starting new work. Records already queued can still be read.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(record) = self.next().await {
            out.push(record);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_stream_ends_immediately() {
        let mut stream = RecordStream::empty();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn collects_until_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let stream = RecordStream::new(rx);
        tokio::spawn(async move {
            for i in 0..3u8 {
                tx.send(vec![i]).await.expect("send");
            }
        });
        assert_eq!(stream.collect().await, vec![vec![0], vec![1], vec![2]]);
    }

    #[tokio::test]
    async fn close_is_visible_to_producer() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(1);
        let mut stream = RecordStream::new(rx);
        stream.close();
        assert!(tx.is_closed());
        assert!(stream.next().await.is_none());
    }
}
