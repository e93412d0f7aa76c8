//! Built-in GS1-style templates, installed for any document type that has
//! no template yet.

use crate::document::DocumentType;

use super::{XmlTemplate, DEFAULT_CONTENT_TYPE};

const ORDER_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document>
  <DocumentType>ORDER</DocumentType>
  <DocumentId>{{number}}</DocumentId>
  <DocumentDate>{{date}}</DocumentDate>
  <DeliveryDate>{{delivery_date}}</DeliveryDate>
  <Currency>{{currency}}</Currency>
  <Parties>
    <Supplier><GLN>{{supplier_gln}}</GLN><Name>{{supplier_name}}</Name></Supplier>
    <Buyer><GLN>{{buyer_gln}}</GLN><Name>{{buyer_name}}</Name></Buyer>
  </Parties>
  <Lines>
{{positions}}
  </Lines>
</Document>"#;

const ORDER_POSITION: &str = r#"    <Line>
      <LineNumber>{{line}}</LineNumber>
      <EAN>{{ean}}</EAN>
      <ItemCode>{{item_code}}</ItemCode>
      <ItemName>{{item_name}}</ItemName>
      <Quantity>{{quantity}}</Quantity>
      <UnitPrice>{{unit_price}}</UnitPrice>
      <VAT>{{vat}}</VAT>
      <Amount>{{amount}}</Amount>
      <AmountWithVAT>{{amount_with_vat}}</AmountWithVAT>
    </Line>"#;

const ORDRSP_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document>
  <DocumentType>ORDRSP</DocumentType>
  <DocumentId>{{number}}</DocumentId>
  <DocumentDate>{{date}}</DocumentDate>
  <OrderNumber>{{order_number}}</OrderNumber>
  <Parties>
    <Supplier><GLN>{{supplier_gln}}</GLN></Supplier>
    <Buyer><GLN>{{buyer_gln}}</GLN></Buyer>
  </Parties>
  <Lines>
{{positions}}
  </Lines>
</Document>"#;

const ORDRSP_POSITION: &str = r#"    <Line>
      <LineNumber>{{line}}</LineNumber>
      <EAN>{{ean}}</EAN>
      <ItemName>{{item_name}}</ItemName>
      <Quantity>{{quantity}}</Quantity>
      <UnitPrice>{{unit_price}}</UnitPrice>
    </Line>"#;

const DESADV_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document>
  <DocumentType>DESADV</DocumentType>
  <DocumentId>{{number}}</DocumentId>
  <DocumentDate>{{date}}</DocumentDate>
  <ShipmentDate>{{shipment_date}}</ShipmentDate>
  <OrderNumber>{{order_number}}</OrderNumber>
  <Parties>
    <Supplier><GLN>{{supplier_gln}}</GLN></Supplier>
    <Buyer><GLN>{{buyer_gln}}</GLN></Buyer>
  </Parties>
  <Lines>
{{positions}}
  </Lines>
</Document>"#;

const DESADV_POSITION: &str = r#"    <Line>
      <LineNumber>{{line}}</LineNumber>
      <EAN>{{ean}}</EAN>
      <ItemName>{{item_name}}</ItemName>
      <Quantity>{{quantity}}</Quantity>
    </Line>"#;

const INVOICE_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document>
  <DocumentType>INVOICE</DocumentType>
  <DocumentId>{{number}}</DocumentId>
  <DocumentDate>{{date}}</DocumentDate>
  <OrderNumber>{{order_number}}</OrderNumber>
  <TotalAmount>{{total_amount}}</TotalAmount>
  <TotalVAT>{{total_vat}}</TotalVAT>
  <TotalWithVAT>{{total_with_vat}}</TotalWithVAT>
  <Currency>{{currency}}</Currency>
  <Parties>
    <Supplier><GLN>{{supplier_gln}}</GLN></Supplier>
    <Buyer><GLN>{{buyer_gln}}</GLN></Buyer>
  </Parties>
  <Lines>
{{positions}}
  </Lines>
</Document>"#;

const INVOICE_POSITION: &str = r#"    <Line>
      <LineNumber>{{line}}</LineNumber>
      <EAN>{{ean}}</EAN>
      <ItemName>{{item_name}}</ItemName>
      <Quantity>{{quantity}}</Quantity>
      <UnitPrice>{{unit_price}}</UnitPrice>
      <VAT>{{vat}}</VAT>
      <Amount>{{amount}}</Amount>
      <AmountWithVAT>{{amount_with_vat}}</AmountWithVAT>
    </Line>"#;

const PRICAT_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document>
  <DocumentType>PRICAT</DocumentType>
  <DocumentId>{{number}}</DocumentId>
  <DocumentDate>{{date}}</DocumentDate>
  <Currency>{{currency}}</Currency>
  <Parties>
    <Supplier><GLN>{{supplier_gln}}</GLN></Supplier>
    <Buyer><GLN>{{buyer_gln}}</GLN></Buyer>
  </Parties>
  <Items>
{{positions}}
  </Items>
</Document>"#;

const PRICAT_POSITION: &str = r#"    <Item>
      <LineNumber>{{line}}</LineNumber>
      <EAN>{{ean}}</EAN>
      <ItemCode>{{item_code}}</ItemCode>
      <ItemName>{{item_name}}</ItemName>
      <UnitPrice>{{unit_price}}</UnitPrice>
      <VAT>{{vat}}</VAT>
    </Item>"#;

/// The built-in template for a document type, at version 1.
pub fn default_template(doc_type: DocumentType) -> XmlTemplate {
    let (body, position_template) = match doc_type {
        DocumentType::Order => (ORDER_BODY, ORDER_POSITION),
        DocumentType::OrderResponse => (ORDRSP_BODY, ORDRSP_POSITION),
        DocumentType::DispatchAdvice => (DESADV_BODY, DESADV_POSITION),
        DocumentType::Invoice => (INVOICE_BODY, INVOICE_POSITION),
        DocumentType::PriceCatalog => (PRICAT_BODY, PRICAT_POSITION),
    };
    XmlTemplate {
        doc_type,
        name: format!("GS1 {} (default)", doc_type.code()),
        body: body.to_string(),
        position_template: position_template.to_string(),
        content_type: DEFAULT_CONTENT_TYPE.to_string(),
        version: 1,
    }
}
