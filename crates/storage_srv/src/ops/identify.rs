use super::*;

impl Node {
    /// ID: a peer introduces itself and learns this node's public key.
    pub(super) fn identify(
        &self,
        params: &Params,
        host: &str,
    ) -> OpResult<Reply> {
        params.required("nodeId")?;
        let requester = Requester::from_params(params, host)?;

        self.peers
            .record_contact(&requester.node_id, host, requester.port);
        tracing::info!(
            node = %requester.node_id,
            host,
            port = requester.port,
            "peer identified",
        );

        let public = self.key.public();
        Ok(Reply::json(
            200,
            &serde_json::json!({
                "nodeId": self.key.node_id().to_hex(),
                "publicKeyExponent": public.exponent(),
                "publicKeyModulus": public.modulus(),
            }),
        ))
    }
}
