use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};

/// Peer messages, carried as `{"type": ..., "data": ...}` inside an [`Envelope`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    #[serde(rename = "requestBlockChainHeight")]
    RequestHeight,
    #[serde(rename = "sendBlockChainHeight")]
    ReceiveHeight(u64),
    #[serde(rename = "requestBlock")]
    RequestBlock(u64),
    #[serde(rename = "receiveNextBlock")]
    ReceiveBlock(Option<Block>),
    #[serde(rename = "getNewBlock")]
    NewBlockAnnounce { block: Block, sender: String },
    #[serde(rename = "transaction")]
    RegisterTransaction(Transaction),
    /// First line on every connection; clients leave `listen_addr` empty
    #[serde(rename = "hello")]
    Hello {
        node_id: String,
        listen_addr: Option<String>,
    },
    #[serde(rename = "submitTransaction")]
    SubmitTransaction(SubmissionPayload),
    #[serde(rename = "submissionResult")]
    SubmissionResult(SubmissionResult),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RequestHeight => "requestBlockChainHeight",
            Message::ReceiveHeight(_) => "sendBlockChainHeight",
            Message::RequestBlock(_) => "requestBlock",
            Message::ReceiveBlock(_) => "receiveNextBlock",
            Message::NewBlockAnnounce { .. } => "getNewBlock",
            Message::RegisterTransaction(_) => "transaction",
            Message::Hello { .. } => "hello",
            Message::SubmitTransaction(_) => "submitTransaction",
            Message::SubmissionResult(_) => "submissionResult",
        }
    }
}

/// Wire frame: one JSON object per line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub to: Option<String>,
    pub from: String,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    pub fn new(from: &str, to: Option<&str>, message: Message) -> Envelope {
        Envelope {
            to: to.map(str::to_string),
            from: from.to_string(),
            message,
        }
    }

    /// JSON followed by a newline
    pub fn encode_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    pub fn decode_line(line: &str) -> Result<Envelope> {
        let line = line.trim();
        if line.is_empty() {
            return Err(BlockchainError::MalformedMessage("empty line".to_string()));
        }
        Ok(serde_json::from_str(line)?)
    }
}

/// A transaction as submitted by a client; every field may be absent on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub sender: Option<String>,
    pub receiver: Option<String>,
    pub amount: Option<u64>,
    pub fee: Option<u64>,
    pub signature: Option<String>,
    pub time: Option<i64>,
}

impl SubmissionPayload {
    pub fn from_transaction(tx: &Transaction) -> SubmissionPayload {
        SubmissionPayload {
            sender: Some(tx.get_sender().to_string()),
            receiver: Some(tx.get_receiver().to_string()),
            amount: Some(tx.get_amount()),
            fee: Some(tx.get_fee()),
            signature: tx.get_signature().map(str::to_string),
            time: Some(tx.get_time()),
        }
    }

    /// Fails with `MissingField` naming the first absent field
    pub fn into_transaction(self) -> Result<Transaction> {
        let sender = self.sender.ok_or(BlockchainError::MissingField("sender"))?;
        let receiver = self
            .receiver
            .ok_or(BlockchainError::MissingField("receiver"))?;
        let amount = self.amount.ok_or(BlockchainError::MissingField("amount"))?;
        let fee = self.fee.ok_or(BlockchainError::MissingField("fee"))?;
        let signature = self
            .signature
            .ok_or(BlockchainError::MissingField("signature"))?;
        let time = self.time.ok_or(BlockchainError::MissingField("time"))?;
        Ok(Transaction::from_parts(
            &sender,
            &receiver,
            amount,
            fee,
            Some(signature),
            time,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SubmissionResult {
    Accepted { id: String },
    Rejected { error: String },
}
