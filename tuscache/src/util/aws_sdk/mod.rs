mod stream;

pub(crate) use stream::IntoStream;
