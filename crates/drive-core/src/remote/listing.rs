//! Lazy paginated child listings

use std::collections::VecDeque;

use super::{RemoteClient, RemoteId, RemoteObject, RemoteResult, RetryPolicy};

/// Children of one remote folder, fetched a page at a time.
///
/// Pages are requested only when the buffered items run out, and the
/// continuation token is followed until the service stops returning one. A
/// listing cannot be restarted mid-way; build a new one instead.
pub struct Listing<'a> {
    client: &'a dyn RemoteClient,
    retry: RetryPolicy,
    parent: Option<RemoteId>,
    name: Option<String>,
    buffer: VecDeque<RemoteObject>,
    next_token: Option<String>,
    started: bool,
}

impl<'a> Listing<'a> {
    pub fn new(
        client: &'a dyn RemoteClient,
        retry: RetryPolicy,
        parent: Option<&RemoteId>,
        name: Option<&str>,
    ) -> Self {
        Self {
            client,
            retry,
            parent: parent.cloned(),
            name: name.map(str::to_string),
            buffer: VecDeque::new(),
            next_token: None,
            started: false,
        }
    }

    fn exhausted(&self) -> bool {
        self.started && self.next_token.is_none()
    }

    /// Next child, fetching another page when needed.
    pub async fn next(&mut self) -> RemoteResult<Option<RemoteObject>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if self.exhausted() {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> RemoteResult<()> {
        let client = self.client;
        let parent = self.parent.as_ref();
        let name = self.name.as_deref();
        let token = self.next_token.as_deref();

        let page = self
            .retry
            .run("list", || client.list_page(parent, name, token))
            .await?;

        self.started = true;
        self.buffer.extend(page.items);
        self.next_token = page.next_page_token.filter(|t| !t.is_empty());
        Ok(())
    }

    /// Drain the listing into a vector.
    pub async fn collect_all(mut self) -> RemoteResult<Vec<RemoteObject>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Folders with exactly the requested name, in listing order.
    ///
    /// Services may match names loosely; this keeps exact matches only.
    pub async fn folders_named(self, name: &str) -> RemoteResult<Vec<RemoteObject>> {
        Ok(self
            .collect_all()
            .await?
            .into_iter()
            .filter(|o| o.is_folder() && o.name == name)
            .collect())
    }
}
