//! In-memory source for tests and demos.
//!
//! Records every call's options, serves a fixed list, and lets the caller push
//! events into (and close) every watch it has handed out.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use kstate_core::{
    watch_channel, ListOptions, ListWatch, ObjectList, RawObject, Result, StopHandle, WatchEvent, WatchStream,
};
use tokio::sync::mpsc;

#[derive(Default)]
struct State {
    list: ObjectList,
    list_error: Option<String>,
    watch_error: Option<String>,
    list_calls: Vec<ListOptions>,
    watch_calls: Vec<ListOptions>,
    feeds: Vec<mpsc::Sender<WatchEvent>>,
    stops: Vec<StopHandle>,
}

#[derive(Default)]
pub struct FakeListWatch {
    state: Mutex<State>,
}

impl FakeListWatch {
    pub fn new(items: Vec<RawObject>, resource_version: &str) -> Arc<Self> {
        let fake = Self::default();
        fake.lock().list = ObjectList { items, resource_version: resource_version.to_string() };
        Arc::new(fake)
    }

    /// Fail every `list` with `msg`.
    pub fn fail_list(&self, msg: &str) { self.lock().list_error = Some(msg.to_string()); }

    /// Fail every `watch` with `msg`.
    pub fn fail_watch(&self, msg: &str) { self.lock().watch_error = Some(msg.to_string()); }

    pub fn list_calls(&self) -> Vec<ListOptions> { self.lock().list_calls.clone() }

    pub fn watch_calls(&self) -> Vec<ListOptions> { self.lock().watch_calls.clone() }

    /// Stop handles of every watch opened so far, in opening order.
    pub fn stop_handles(&self) -> Vec<StopHandle> { self.lock().stops.clone() }

    /// Deliver `ev` to every open watch; returns how many accepted it.
    pub async fn emit(&self, ev: WatchEvent) -> usize {
        let feeds = self.lock().feeds.clone();
        let mut delivered = 0;
        for feed in feeds {
            if feed.send(ev.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// End every open watch as if the server closed it.
    pub fn close_watches(&self) { self.lock().feeds.clear(); }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ListWatch for FakeListWatch {
    async fn list(&self, opts: &ListOptions) -> Result<ObjectList> {
        let mut st = self.lock();
        st.list_calls.push(opts.clone());
        if let Some(msg) = &st.list_error {
            return Err(anyhow!("{msg}").into());
        }
        Ok(st.list.clone())
    }

    async fn watch(&self, opts: &ListOptions) -> Result<WatchStream> {
        let mut st = self.lock();
        st.watch_calls.push(opts.clone());
        if let Some(msg) = &st.watch_error {
            return Err(anyhow!("{msg}").into());
        }
        let stop = StopHandle::new();
        let (tx, out) = watch_channel(stop.clone());
        let (feed_tx, feed) = watch_channel(StopHandle::new());
        st.feeds.push(feed_tx);
        st.stops.push(stop.clone());
        tokio::spawn(crate::forward(feed, tx, stop, |_| true));
        Ok(out)
    }
}
