//! Declaration of the public JSON-RPC surface. The server implementation
//! lives in `opnet_api_server`; this crate only defines the namespace trait
//! and the wire types, mirroring how the method set is versioned
//! independently of the node internals.

use jsonrpsee::{core::RpcResult, proc_macros::rpc};

use opnet_basic_types::H256;

pub mod types;

pub use types::*;

#[rpc(server, namespace = "btc")]
pub trait OpnetApi {
    #[method(name = "blockNumber")]
    async fn block_number(&self) -> RpcResult<String>;

    #[method(name = "getBlockByHash")]
    async fn get_block_by_hash(
        &self,
        block_hash: H256,
        send_transactions: Option<bool>,
    ) -> RpcResult<Option<BlockResponse>>;

    #[method(name = "getBlockByNumber")]
    async fn get_block_by_number(
        &self,
        height: Option<BlockTag>,
        send_transactions: Option<bool>,
    ) -> RpcResult<Option<BlockResponse>>;

    #[method(name = "getBlockHeaderByHash")]
    async fn get_block_header_by_hash(
        &self,
        block_hash: H256,
    ) -> RpcResult<Option<BlockHeaderResponse>>;

    #[method(name = "getBlockHeaderByNumber")]
    async fn get_block_header_by_number(
        &self,
        height: Option<BlockTag>,
    ) -> RpcResult<Option<BlockHeaderResponse>>;

    #[method(name = "getTransactionByHash")]
    async fn get_transaction_by_hash(&self, hash: H256)
        -> RpcResult<Option<TransactionResponse>>;

    #[method(name = "getTransactionReceipt")]
    async fn get_transaction_receipt(&self, hash: H256) -> RpcResult<Option<ReceiptResponse>>;

    #[method(name = "sendRawTransaction")]
    async fn send_raw_transaction(
        &self,
        data: String,
        psbt: Option<bool>,
    ) -> RpcResult<BroadcastResponse>;

    #[method(name = "simulateTransaction")]
    async fn simulate_transaction(&self, request: SimulateRequest) -> RpcResult<SimulateResponse>;

    #[method(name = "call")]
    async fn call(&self, request: SimulateRequest) -> RpcResult<SimulateResponse>;

    #[method(name = "getUTXOs")]
    async fn get_utxos(&self, address: String, optimize: Option<bool>) -> RpcResult<UtxosResponse>;

    #[method(name = "getBalance")]
    async fn get_balance(
        &self,
        address: String,
        filter_ordinals: Option<bool>,
    ) -> RpcResult<String>;

    #[method(name = "getCode")]
    async fn get_code(
        &self,
        address: String,
        only_bytecode: Option<bool>,
    ) -> RpcResult<Option<CodeResponse>>;

    #[method(name = "getStorageAt")]
    async fn get_storage_at(
        &self,
        address: String,
        pointer: H256,
        send_proofs: Option<bool>,
        height: Option<BlockTag>,
    ) -> RpcResult<Option<StorageValueResponse>>;

    #[method(name = "chainId")]
    async fn chain_id(&self) -> RpcResult<String>;

    #[method(name = "reorg")]
    async fn reorg(
        &self,
        from_block: Option<BlockTag>,
        to_block: Option<BlockTag>,
    ) -> RpcResult<Vec<ReorgResponse>>;

    #[method(name = "getBlockWitness")]
    async fn get_block_witness(
        &self,
        height: BlockTag,
        trusted: Option<bool>,
        limit: Option<usize>,
        page: Option<usize>,
    ) -> RpcResult<Vec<WitnessResponse>>;

    #[method(name = "getMempoolInfo")]
    async fn get_mempool_info(&self) -> RpcResult<MempoolInfoResponse>;

    #[method(name = "getPendingTransaction")]
    async fn get_pending_transaction(
        &self,
        hash: H256,
    ) -> RpcResult<Option<PendingTransactionResponse>>;

    #[method(name = "getLatestPendingTransactions")]
    async fn get_latest_pending_transactions(
        &self,
        address: Option<String>,
        addresses: Option<Vec<String>>,
        limit: Option<usize>,
    ) -> RpcResult<Vec<PendingTransactionResponse>>;

    #[method(name = "getEpochByNumber")]
    async fn get_epoch_by_number(&self, number: BlockTag) -> RpcResult<Option<EpochResponse>>;

    #[method(name = "getEpochByHash")]
    async fn get_epoch_by_hash(&self, hash: H256) -> RpcResult<Option<EpochResponse>>;

    #[method(name = "getEpochTemplate")]
    async fn get_epoch_template(&self) -> RpcResult<EpochTemplateResponse>;

    #[method(name = "submitEpoch")]
    async fn submit_epoch(&self, submission: SubmitEpochRequest)
        -> RpcResult<SubmitEpochResponse>;

    /// WebSocket subscription entry point; `topic` selects the event feed.
    #[subscription(name = "subscribe" => "subscription", unsubscribe = "unsubscribe", item = SubscriptionEvent)]
    async fn subscribe(&self, topic: SubscriptionTopic) -> jsonrpsee::core::SubscriptionResult;
}
