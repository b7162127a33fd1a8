//! Test doubles shared by the unit tests of this workspace (`test-support` feature).

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{CallbackAnswer, Formatting, InlineKeyboard},
    },
    Result,
};

#[derive(Clone, Debug)]
pub struct SentMessage {
    pub msg: MessageRef,
    pub text: String,
    pub keyboard: Option<InlineKeyboard>,
    pub formatting: Formatting,
}

#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    sends: Mutex<Vec<SentMessage>>,
    edits: Mutex<Vec<SentMessage>>,
    answers: Mutex<Vec<(String, CallbackAnswer)>>,
    edit_delays: Mutex<HashMap<MessageRef, Duration>>,
    pub fail_sends: AtomicBool,
    pub fail_edits: AtomicBool,
    pub fail_answers: AtomicBool,
}

impl FakeMessenger {
    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(*guard),
        }
    }

    pub fn sends(&self) -> Vec<SentMessage> {
        self.sends.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<SentMessage> {
        self.edits.lock().unwrap().clone()
    }

    pub fn answers(&self) -> Vec<(String, CallbackAnswer)> {
        self.answers.lock().unwrap().clone()
    }

    /// Make every edit of `msg` take `delay` before it lands.
    pub fn delay_edits(&self, msg: MessageRef, delay: Duration) {
        self.edit_delays.lock().unwrap().insert(msg, delay);
    }

    /// Labels of the first button of every edit, in the order the edits landed.
    pub fn edit_labels(&self) -> Vec<String> {
        self.edits()
            .into_iter()
            .filter_map(|e| e.keyboard?.buttons().next().map(|b| b.label.clone()))
            .collect()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
        formatting: Formatting,
    ) -> Result<MessageRef> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::External("send failed".to_string()));
        }
        let msg = self.alloc(chat_id);
        self.sends.lock().unwrap().push(SentMessage {
            msg,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
            formatting,
        });
        Ok(msg)
    }

    async fn edit_message(
        &self,
        msg: MessageRef,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
        formatting: Formatting,
    ) -> Result<()> {
        let delay = self.edit_delays.lock().unwrap().get(&msg).copied();
        match delay {
            Some(d) => tokio::time::sleep(d).await,
            // Give concurrent presses a chance to interleave.
            None => tokio::task::yield_now().await,
        }
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(Error::External("edit failed".to_string()));
        }
        self.edits.lock().unwrap().push(SentMessage {
            msg,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
            formatting,
        });
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, answer: &CallbackAnswer) -> Result<()> {
        if self.fail_answers.load(Ordering::SeqCst) {
            return Err(Error::External("answer failed".to_string()));
        }
        self.answers
            .lock()
            .unwrap()
            .push((callback_id.to_string(), answer.clone()));
        Ok(())
    }
}
