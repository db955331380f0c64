use aws_smithy_async::future::pagination_stream::PaginationStream;
use futures::stream::{self, BoxStream, StreamExt};

/// Adapts the SDK's paginator output into a regular [`futures::Stream`] so the usual combinators
/// (`try_collect`, `try_for_each` and friends) can be used on it.
pub(crate) trait IntoStream {
    type Item;

    fn into_stream(self) -> BoxStream<'static, Self::Item>;
}

impl<T> IntoStream for PaginationStream<T>
where
    T: Send + Unpin + 'static,
{
    type Item = T;

    fn into_stream(self) -> BoxStream<'static, Self::Item> {
        stream::unfold(self, |mut pages| async move {
            pages.next().await.map(|page| (page, pages))
        })
        .boxed()
    }
}
