use std::{pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(String),
    #[error("transform error: {0}")]
    Transform(String),
    #[error("sink error: {0}")]
    Sink(String),
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    /// Short label used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

pub struct Pipeline<S, T, K> {
    pub name: &'static str,
    pub source: S,
    pub transforms: Vec<Arc<dyn Transform<T, T> + Send + Sync>>, // same-type transforms chain
    pub sink: K,
}

impl<T, S, K> Pipeline<S, T, K>
where
    T: Send + 'static,
    S: Source<T> + Send + Sync + 'static,
    K: Sink<T> + Send + Sync + 'static,
{
    pub async fn run(self) -> Result<(), PipelineError> {
        let mut stream = self.source.stream().await;

        let stages: Vec<&'static str> = self.transforms.iter().map(|t| t.name()).collect();
        tracing::info!(pipeline = self.name, ?stages, "pipeline started");

        // Errors from earlier stages skip later transforms and reach the sink as-is.
        for t in self.transforms {
            stream = Box::pin(stream.then(move |item| {
                let t_inner = t.clone();
                async move {
                    match item {
                        Ok(env) => t_inner.apply(env).await,
                        Err(e) => Err(e),
                    }
                }
            }));
        }

        let res = self.sink.run(stream).await;
        tracing::info!(pipeline = self.name, ok = res.is_ok(), "pipeline finished");
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct VecSource(Vec<i32>);

    #[async_trait::async_trait]
    impl Source<i32> for VecSource {
        async fn stream(&self) -> EnvelopeStream<i32> {
            let items: Vec<_> = self.0.iter().copied().map(|v| Ok(Envelope::now(v))).collect();
            Box::pin(futures::stream::iter(items))
        }
    }

    struct RejectOdd;

    #[async_trait::async_trait]
    impl Transform<i32, i32> for RejectOdd {
        fn name(&self) -> &'static str {
            "reject_odd"
        }

        async fn apply(&self, input: Envelope<i32>) -> Result<Envelope<i32>, PipelineError> {
            if input.payload % 2 == 0 {
                Ok(input)
            } else {
                Err(PipelineError::Transform("odd".into()))
            }
        }
    }

    struct Double;

    #[async_trait::async_trait]
    impl Transform<i32, i32> for Double {
        fn name(&self) -> &'static str {
            "double"
        }

        async fn apply(&self, mut input: Envelope<i32>) -> Result<Envelope<i32>, PipelineError> {
            input.payload *= 2;
            Ok(input)
        }
    }

    #[derive(Default)]
    struct CollectSink {
        ok: Arc<Mutex<Vec<i32>>>,
        errors: Arc<Mutex<usize>>,
    }

    #[async_trait::async_trait]
    impl Sink<i32> for CollectSink {
        async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
        where
            S: Stream<Item = Result<Envelope<i32>, PipelineError>> + Send + Unpin + 'static,
        {
            while let Some(item) = input.next().await {
                match item {
                    Ok(env) => self.ok.lock().unwrap().push(env.payload),
                    Err(_) => *self.errors.lock().unwrap() += 1,
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn transforms_apply_in_order_and_errors_pass_through() {
        let sink = CollectSink::default();
        let ok = sink.ok.clone();
        let errors = sink.errors.clone();

        let pipeline: Pipeline<_, i32, _> = Pipeline {
            name: "test",
            source: VecSource(vec![1, 2, 3, 4]),
            transforms: vec![Arc::new(RejectOdd), Arc::new(Double)],
            sink,
        };
        pipeline.run().await.unwrap();

        assert_eq!(*ok.lock().unwrap(), vec![4, 8]);
        assert_eq!(*errors.lock().unwrap(), 2);
    }
}
